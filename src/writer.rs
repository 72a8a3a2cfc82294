//! The MMDB writer (spec §4.B): turns `(prefix, data)` insertions into a
//! complete on-disk database.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use ipnet::IpNet;
use log::debug;

use crate::encoder::{decode_pointer, Encoder};
use crate::error::{MmdbError, MmdbResult};
use crate::ip;
use crate::metadata::{Metadata, BINARY_FORMAT_MAJOR_VERSION, BINARY_FORMAT_MINOR_VERSION};
use crate::tree::{encode_record, pack_record_pair, Tree};
use crate::value::Value;

/// Magic bytes marking the start of the metadata section (spec §6). MaxMind
/// readers locate it by searching backwards from EOF.
pub const METADATA_MAGIC: &[u8] = b"\xab\xcd\xefMaxMind.com";

/// Builder for [`Writer`], mirroring the reference writer's defaults
/// (`ip_version=6, ipv4_compatible=True`).
#[derive(Debug, Clone)]
pub struct WriterOptions {
    ip_version: u16,
    ipv4_compatible: bool,
    record_size: Option<u16>,
    database_type: String,
    languages: Vec<String>,
    description: BTreeMap<String, String>,
    build_epoch: Option<u64>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            ip_version: 6,
            ipv4_compatible: true,
            record_size: None,
            database_type: "mrt2mmdb".to_string(),
            languages: vec!["en".to_string()],
            description: BTreeMap::from([("en".to_string(), "Generated by mrt2mmdb".to_string())]),
            build_epoch: None,
        }
    }
}

impl WriterOptions {
    pub fn ip_version(mut self, v: u16) -> Self {
        self.ip_version = v;
        self
    }

    pub fn ipv4_compatible(mut self, v: bool) -> Self {
        self.ipv4_compatible = v;
        self
    }

    /// Fixes the on-disk record width. Leave unset to auto-select the
    /// smallest of 24/28/32 bits that fits the built tree and data section.
    pub fn record_size(mut self, v: u16) -> Self {
        self.record_size = Some(v);
        self
    }

    pub fn database_type(mut self, v: impl Into<String>) -> Self {
        self.database_type = v.into();
        self
    }

    pub fn languages(mut self, v: Vec<String>) -> Self {
        self.languages = v;
        self
    }

    pub fn description(mut self, v: BTreeMap<String, String>) -> Self {
        self.description = v;
        self
    }

    pub fn build_epoch(mut self, v: u64) -> Self {
        self.build_epoch = Some(v);
        self
    }
}

/// Accumulates `(network, data)` insertions and serializes them into a
/// complete MMDB file on [`Writer::write_to`]/[`Writer::write_to_path`].
///
/// The writer itself is the only place network insertion order matters: it
/// always finalizes networks from most to least specific (longest prefix
/// first), so that the tree (`crate::tree::Tree::insert`) only ever has to
/// fill in the leaves a more specific prefix left empty, regardless of what
/// order the caller queued insertions in (spec §4.B / §9: "caller sorts
/// longest-first, writer preserves non-empty leaves").
pub struct Writer {
    options: WriterOptions,
    records: Vec<(Vec<bool>, Value)>,
}

impl Writer {
    pub fn new(options: WriterOptions) -> Self {
        Writer {
            options,
            records: Vec::new(),
        }
    }

    /// Queues `data` to be stored at `network`. Finalization happens in
    /// [`Writer::write_to`].
    pub fn insert(&mut self, network: &IpNet, data: Value) -> MmdbResult<()> {
        if self.options.ip_version == 6 && !self.options.ipv4_compatible && matches!(network, IpNet::V4(_)) {
            return Err(MmdbError::UnsupportedPrefix(
                "IPv4 network given to an ip_version=6 writer with ipv4_compatible=false".into(),
            ));
        }
        let bits = ip::prefix_bits(network, self.options.ip_version)?;
        self.records.push((bits, data));
        Ok(())
    }

    /// Number of pending insertions not yet written.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Builds the tree and data section, then streams the complete file to
    /// `out`.
    pub fn write_to<W: Write + Seek>(mut self, mut out: W) -> MmdbResult<()> {
        self.records
            .sort_by_key(|(bits, _)| std::cmp::Reverse(bits.len()));

        let mut tree = Tree::new();
        let mut encoder = Encoder::new(true);
        for (bits, value) in &self.records {
            let pointer = encoder.encode(value)?;
            let offset: u32 = decode_pointer(&pointer)?
                .try_into()
                .map_err(|_| MmdbError::EncodeOverflow("data section offset overflowed u32".into()))?;
            tree.insert(bits, offset);
        }

        let node_count = tree.node_count() as u32;
        let data = encoder.into_data_section();
        let record_size = self.resolve_record_size(node_count, data.len())?;
        debug!(
            "writing {} node(s), {} byte(s) of data, record_size={record_size}",
            node_count,
            data.len()
        );

        for node in tree.nodes() {
            let left = encode_record(node.left, node_count);
            let right = encode_record(node.right, node_count);
            out.write_all(&pack_record_pair(left, right, record_size)?)?;
        }
        out.write_all(&[0u8; 16])?;
        out.write_all(&data)?;

        let metadata = Metadata {
            node_count,
            record_size,
            ip_version: self.options.ip_version,
            database_type: self.options.database_type,
            languages: self.options.languages,
            binary_format_major_version: BINARY_FORMAT_MAJOR_VERSION,
            binary_format_minor_version: BINARY_FORMAT_MINOR_VERSION,
            build_epoch: self.options.build_epoch.unwrap_or_else(default_build_epoch),
            description: self.options.description,
            extra: BTreeMap::new(),
        };
        out.write_all(METADATA_MAGIC)?;
        out.write_all(&crate::encoder::encode_metadata(&metadata.into_map())?)?;
        out.flush()?;
        Ok(())
    }

    /// Convenience wrapper that creates (or truncates) `path` and writes to it.
    pub fn write_to_path<P: AsRef<Path>>(self, path: P) -> MmdbResult<()> {
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))
    }

    fn resolve_record_size(&self, node_count: u32, data_len: usize) -> MmdbResult<u16> {
        // Every record must be able to express both an empty/self-referential
        // node index up to node_count, and a data pointer up to
        // node_count + 16 + data_len.
        let max_needed = node_count as u64 + 16 + data_len as u64;
        let candidates: Vec<u16> = match self.options.record_size {
            Some(rs) => {
                if ![24, 28, 32].contains(&rs) {
                    return Err(MmdbError::InvalidDatabase(format!(
                        "record_size must be 24, 28, or 32, got {rs}"
                    )));
                }
                vec![rs]
            }
            None => vec![24, 28, 32],
        };
        for rs in candidates {
            let limit: u64 = if rs == 32 { u32::MAX as u64 } else { (1u64 << rs) - 1 };
            if max_needed <= limit {
                return Ok(rs);
            }
        }
        Err(MmdbError::EncodeOverflow(format!(
            "no record_size fits {node_count} nodes and {data_len} bytes of data"
        )))
    }
}

fn default_build_epoch() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn write_to_produces_metadata_magic_near_eof() {
        let mut writer = Writer::new(WriterOptions::default().database_type("test"));
        let mut m = BTreeMap::new();
        m.insert("asn".to_string(), Value::Uint32(15169));
        writer
            .insert(&"8.8.8.0/24".parse().unwrap(), Value::Map(m))
            .unwrap();

        let mut buf = Cursor::new(Vec::new());
        writer.write_to(&mut buf).unwrap();
        let bytes = buf.into_inner();
        assert!(
            bytes.windows(METADATA_MAGIC.len()).any(|w| w == METADATA_MAGIC),
            "metadata magic missing from output"
        );
    }

    #[test]
    fn record_size_auto_selects_smallest_fit() {
        let writer = Writer::new(WriterOptions::default());
        assert_eq!(writer.resolve_record_size(10, 10).unwrap(), 24);
    }

    #[test]
    fn record_size_escalates_when_offsets_overflow_24_bits() {
        let writer = Writer::new(WriterOptions::default());
        let huge_data_len = (1usize << 24) + 100;
        assert_eq!(writer.resolve_record_size(10, huge_data_len).unwrap(), 28);
    }

    #[test]
    fn rejects_ipv4_network_when_incompatible() {
        let mut writer = Writer::new(WriterOptions::default().ipv4_compatible(false));
        let err = writer.insert(&"1.2.3.0/24".parse().unwrap(), Value::Boolean(true));
        assert!(err.is_err());
    }
}
