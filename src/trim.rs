//! The trimmer (spec §4.D): drops fields from every record in an existing
//! MMDB file without rebuilding its tree.
//!
//! Grounded directly on the reference tool's `filter.py`: copy the file,
//! then patch only the leaf record integers that point into the data
//! section, leaving every tree-structure byte and the metadata untouched.
//! The new (smaller) data section is appended after the unchanged tree, and
//! the file is truncated to make room for it first.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::encoder::{decode_pointer, encode_metadata, Encoder};
use crate::error::{MmdbError, MmdbResult};
use crate::reader::Reader;
use crate::tree::{bytes_per_node, encode_record, pack_record_pair, unpack_record_pair, Record};
use crate::writer::METADATA_MAGIC;

/// Trims `dropped_keys` from every record in the database at `src`, writing
/// the result to `<src>.trim` and returning that path.
///
/// `dropped_keys` are removed at every depth (inside nested maps and
/// arrays), matching [`crate::value::Value::without_keys`].
pub fn trim<P: AsRef<Path>>(src: P, dropped_keys: &[String]) -> MmdbResult<PathBuf> {
    let src_path = src.as_ref();
    let mut dest_name = src_path.as_os_str().to_os_string();
    dest_name.push(".trim");
    let dest_path = PathBuf::from(dest_name);

    std::fs::copy(src_path, &dest_path)?;

    let source_bytes = std::fs::read(src_path)?;
    let reader = Reader::from_bytes(source_bytes)?;
    let record_size = reader.metadata.record_size;
    let node_count = reader.metadata.node_count;
    let node_size = bytes_per_node(record_size)?;

    let mut encoder = Encoder::new(true);
    let mut patches = Vec::new();
    let mut records_seen = 0usize;
    for leaf in reader.iter() {
        let leaf = leaf?;
        let trimmed = leaf.value.without_keys(dropped_keys);
        let pointer = encoder.encode(&trimmed)?;
        let new_offset: u32 = decode_pointer(&pointer)?
            .try_into()
            .map_err(|_| MmdbError::EncodeOverflow("trimmed data section offset overflowed u32".into()))?;
        patches.push((leaf.node_idx, leaf.is_right, new_offset));
        records_seen += 1;
    }
    info!("trimming {records_seen} record(s), dropping {dropped_keys:?}");

    let mut dest = OpenOptions::new().read(true).write(true).open(&dest_path)?;
    for (node_idx, is_right, new_offset) in patches {
        patch_record(&mut dest, node_idx, is_right, new_offset, record_size, node_count, node_size)?;
    }

    let new_data = encoder.into_data_section();
    let data_start = node_count as u64 * node_size as u64 + 16;
    dest.set_len(data_start)?;
    dest.seek(SeekFrom::Start(data_start))?;
    dest.write_all(&new_data)?;
    dest.write_all(METADATA_MAGIC)?;
    dest.write_all(&encode_metadata(&reader.metadata.clone().into_map())?)?;
    dest.flush()?;

    Ok(dest_path)
}

/// Rewrites one side of one node's record in place, preserving the other
/// side exactly. For `record_size == 28` this necessarily re-reads and
/// re-writes the shared middle byte (spec §3/§9).
fn patch_record(
    dest: &mut File,
    node_idx: u32,
    is_right: bool,
    new_offset: u32,
    record_size: u16,
    node_count: u32,
    node_size: usize,
) -> MmdbResult<()> {
    let start = node_idx as u64 * node_size as u64;
    dest.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; node_size];
    dest.read_exact(&mut buf)?;

    let (mut left, mut right) = unpack_record_pair(&buf, record_size)?;
    let new_raw = encode_record(Record::Data(new_offset), node_count);
    if is_right {
        right = new_raw;
    } else {
        left = new_raw;
    }
    let patched = pack_record_pair(left, right, record_size)?;

    dest.seek(SeekFrom::Start(start))?;
    dest.write_all(&patched)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use crate::writer::{Writer, WriterOptions};
    use std::collections::BTreeMap;

    fn sample_record(geoname_id: u32) -> Value {
        let mut m = BTreeMap::new();
        m.insert("geoname_id".to_string(), Value::Uint32(geoname_id));
        m.insert("country".to_string(), Value::String("US".to_string()));
        Value::Map(m)
    }

    #[test]
    fn trim_drops_keys_but_preserves_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("db.mmdb");

        let mut writer = Writer::new(WriterOptions::default());
        writer.insert(&"1.2.3.0/24".parse().unwrap(), sample_record(1)).unwrap();
        writer.insert(&"5.6.7.0/24".parse().unwrap(), sample_record(2)).unwrap();
        writer.write_to_path(&src).unwrap();

        let trimmed_path = trim(&src, &["geoname_id".to_string()]).unwrap();
        assert_eq!(trimmed_path, src.with_extension("mmdb.trim"));

        let reader = Reader::open(&trimmed_path).unwrap();
        let result = reader.lookup("1.2.3.4".parse().unwrap()).unwrap().unwrap();
        let map = result.value.as_map().unwrap();
        assert!(!map.contains_key("geoname_id"));
        assert_eq!(map["country"], Value::String("US".to_string()));

        // metadata (node_count/record_size/ip_version) is untouched
        let original = Reader::open(&src).unwrap();
        assert_eq!(reader.metadata.node_count, original.metadata.node_count);
        assert_eq!(reader.metadata.record_size, original.metadata.record_size);
    }

    #[test]
    fn trim_preserves_both_records_after_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("db.mmdb");
        let mut writer = Writer::new(WriterOptions::default());
        writer.insert(&"1.2.3.0/24".parse().unwrap(), sample_record(1)).unwrap();
        writer.insert(&"5.6.7.0/24".parse().unwrap(), sample_record(1)).unwrap();
        writer.write_to_path(&src).unwrap();

        let trimmed_path = trim(&src, &["geoname_id".to_string()]).unwrap();
        let reader = Reader::open(&trimmed_path).unwrap();
        let a = reader.lookup("1.2.3.4".parse().unwrap()).unwrap().unwrap();
        let b = reader.lookup("5.6.7.8".parse().unwrap()).unwrap().unwrap();
        assert_eq!(a.value, b.value);
    }
}
