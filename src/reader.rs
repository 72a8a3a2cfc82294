//! The MMDB reader (spec §4.C): opens a database and looks up addresses.
//!
//! Readers work over any `&[u8]`; [`Reader::open`] memory-maps a path so
//! large databases don't need to be copied into the process's heap (the
//! read-only counterpart of `crate::writer::Writer::write_to_path`).

use std::fs::File;
use std::net::IpAddr;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{MmdbError, MmdbResult};
use crate::ip;
use crate::metadata::Metadata;
use crate::tree::{bytes_per_node, decode_record, unpack_record_pair, Record};
use crate::value::Value;
use crate::writer::METADATA_MAGIC;

/// Backward search window for the metadata magic (spec §6): MaxMind readers
/// never scan more than the last 128 KiB of the file.
const METADATA_SEARCH_WINDOW: usize = 128 * 1024;

/// Owns either a memory map or an in-memory buffer; everything else in this
/// module only ever sees `&[u8]`.
enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Mapped(m) => &m[..],
            Backing::Owned(v) => &v[..],
        }
    }
}

/// An opened MMDB database.
pub struct Reader {
    backing: Backing,
    pub metadata: Metadata,
    tree_end: usize,
    data_start: usize,
}

impl Reader {
    /// Memory-maps `path` and parses its metadata.
    pub fn open<P: AsRef<Path>>(path: P) -> MmdbResult<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MmdbError::SourceUnavailable(path.as_ref().display().to_string())
            } else {
                MmdbError::Io(e)
            }
        })?;
        // Safety: the file is not expected to be mutated out from under us
        // for the lifetime of the mapping; callers opening databases that
        // may be concurrently replaced should use `Reader::from_bytes`.
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_backing(Backing::Mapped(mmap))
    }

    /// Parses a database already fully read into memory.
    pub fn from_bytes(bytes: Vec<u8>) -> MmdbResult<Self> {
        Self::from_backing(Backing::Owned(bytes))
    }

    fn from_backing(backing: Backing) -> MmdbResult<Self> {
        let bytes = backing.as_slice();
        let magic_pos = find_metadata_magic(bytes)?;
        let metadata_start = magic_pos + METADATA_MAGIC.len();
        let (value, _) = decode_value(bytes, metadata_start)?;
        let metadata = Metadata::try_from(&value)?;

        let node_size = bytes_per_node(metadata.record_size)?;
        let tree_end = metadata.node_count as usize * node_size;
        // The tree is followed by a 16-byte all-zero separator (spec §6).
        let data_start = tree_end + 16;
        if data_start > magic_pos {
            return Err(MmdbError::InvalidDatabase(
                "tree and separator run past the metadata magic".into(),
            ));
        }

        Ok(Reader {
            backing,
            metadata,
            tree_end,
            data_start,
        })
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.backing.as_slice()
    }

    /// Byte offset of the tree/separator boundary; `tree_end..data_start` is
    /// the 16-byte all-zero separator (spec §6).
    pub(crate) fn tree_end(&self) -> usize {
        self.tree_end
    }

    pub(crate) fn data_start(&self) -> usize {
        self.data_start
    }

    pub(crate) fn read_node(&self, node_idx: u32) -> MmdbResult<(Record, Record)> {
        let node_size = bytes_per_node(self.metadata.record_size)?;
        let start = node_idx as usize * node_size;
        let end = start + node_size;
        let bytes = self.bytes();
        if end > self.tree_end {
            return Err(MmdbError::InvalidDatabase(format!(
                "node index {node_idx} out of range"
            )));
        }
        let (left, right) = unpack_record_pair(&bytes[start..end], self.metadata.record_size)?;
        Ok((
            decode_record(left, self.metadata.node_count),
            decode_record(right, self.metadata.node_count),
        ))
    }

    /// Walks the tree for `addr`, returning the decoded data value, the
    /// number of leading bits that matched (the prefix length the returned
    /// record is valid for), and the data section offset it resolved to.
    pub fn lookup(&self, addr: IpAddr) -> MmdbResult<Option<LookupResult>> {
        let bits = ip::address_bits(addr, self.metadata.ip_version)?;
        let mut node_idx = 0u32;
        for (matched, &bit) in bits.iter().enumerate() {
            let (left, right) = self.read_node(node_idx)?;
            let record = if bit { right } else { left };
            match record {
                Record::Empty => return Ok(None),
                Record::Node(n) => node_idx = n,
                Record::Data(offset) => {
                    let (value, _) = decode_value(self.bytes(), self.data_start + offset as usize)?;
                    return Ok(Some(LookupResult {
                        value,
                        prefix_len: matched as u8 + 1,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Iterates every `(prefix, value)` pair stored in the tree, in
    /// depth-first, left-then-right order. Used by ASN-table loading
    /// (`crate::enrich::asn`) and by the trimmer.
    pub fn iter(&self) -> RecordIter<'_> {
        RecordIter {
            reader: self,
            stack: vec![WalkFrame {
                node_idx: 0,
                bits: Vec::new(),
                visited_left: false,
            }],
        }
    }
}

pub struct LookupResult {
    pub value: Value,
    pub prefix_len: u8,
}

struct WalkFrame {
    node_idx: u32,
    bits: Vec<bool>,
    visited_left: bool,
}

/// One leaf record discovered while walking a [`Reader`]'s tree: its address
/// bits, decoded value, and the exact `(node_idx, is_right)` location the
/// trimmer (`crate::trim`) needs to patch it in place.
pub struct LeafRecord {
    pub bits: Vec<bool>,
    pub value: Value,
    pub node_idx: u32,
    pub is_right: bool,
}

/// Depth-first iterator over every leaf record in a [`Reader`]'s tree.
pub struct RecordIter<'a> {
    reader: &'a Reader,
    stack: Vec<WalkFrame>,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = MmdbResult<LeafRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let node_idx = frame.node_idx;
            let (left, right) = match self.reader.read_node(node_idx) {
                Ok(pair) => pair,
                Err(e) => {
                    self.stack.pop();
                    return Some(Err(e));
                }
            };

            if !frame.visited_left {
                frame.visited_left = true;
                let mut bits = frame.bits.clone();
                bits.push(false);
                match left {
                    Record::Empty => continue,
                    Record::Node(n) => {
                        self.stack.push(WalkFrame {
                            node_idx: n,
                            bits,
                            visited_left: false,
                        });
                        continue;
                    }
                    Record::Data(offset) => {
                        return Some(
                            decode_value(self.reader.bytes(), self.reader.data_start + offset as usize).map(
                                |(value, _)| LeafRecord {
                                    bits,
                                    value,
                                    node_idx,
                                    is_right: false,
                                },
                            ),
                        );
                    }
                }
            }

            let mut bits = frame.bits.clone();
            self.stack.pop();
            bits.push(true);
            match right {
                Record::Empty => continue,
                Record::Node(n) => {
                    self.stack.push(WalkFrame {
                        node_idx: n,
                        bits,
                        visited_left: false,
                    });
                    continue;
                }
                Record::Data(offset) => {
                    return Some(
                        decode_value(self.reader.bytes(), self.reader.data_start + offset as usize).map(
                            |(value, _)| LeafRecord {
                                bits,
                                value,
                                node_idx,
                                is_right: true,
                            },
                        ),
                    );
                }
            }
        }
    }
}

fn find_metadata_magic(bytes: &[u8]) -> MmdbResult<usize> {
    let search_start = bytes.len().saturating_sub(METADATA_SEARCH_WINDOW);
    bytes[search_start..]
        .windows(METADATA_MAGIC.len())
        .rposition(|w| w == METADATA_MAGIC)
        .map(|pos| search_start + pos)
        .ok_or_else(|| MmdbError::InvalidDatabase("metadata magic not found".into()))
}

/// Decodes one tagged value starting at `pos`, returning it and the offset
/// just past it. Pointers are chased transparently; the returned offset for
/// a pointer is the byte just past the *pointer*, not its target.
fn decode_value(bytes: &[u8], pos: usize) -> MmdbResult<(Value, usize)> {
    let control = *bytes
        .get(pos)
        .ok_or_else(|| MmdbError::InvalidDatabase(format!("read past end of file at offset {pos}")))?;
    let mut type_id = control >> 5;
    let mut header_len = 1;
    if type_id == 0 {
        let ext = *bytes
            .get(pos + 1)
            .ok_or_else(|| MmdbError::InvalidDatabase("truncated extended type tag".into()))?;
        type_id = ext + 7;
        header_len = 2;
    }

    if type_id == crate::encoder::tag::POINTER {
        return decode_pointer_value(bytes, pos, control);
    }

    let size_bits = control & 0x1F;
    let (length, length_extra) = if size_bits < 29 {
        (size_bits as usize, 0)
    } else if size_bits == 29 {
        let b = *bytes
            .get(pos + header_len)
            .ok_or_else(|| MmdbError::InvalidDatabase("truncated length byte".into()))?;
        (29 + b as usize, 1)
    } else if size_bits == 30 {
        let b0 = *bytes.get(pos + header_len).unwrap_or(&0);
        let b1 = *bytes.get(pos + header_len + 1).unwrap_or(&0);
        (285 + (((b0 as usize) << 8) | b1 as usize), 2)
    } else {
        let b0 = *bytes.get(pos + header_len).unwrap_or(&0);
        let b1 = *bytes.get(pos + header_len + 1).unwrap_or(&0);
        let b2 = *bytes.get(pos + header_len + 2).unwrap_or(&0);
        (65_821 + (((b0 as usize) << 16) | ((b1 as usize) << 8) | b2 as usize), 3)
    };

    let payload_start = pos + header_len + length_extra;
    let payload_end = payload_start + length;
    let payload = bytes
        .get(payload_start..payload_end)
        .ok_or_else(|| MmdbError::InvalidDatabase("value payload runs past end of file".into()))?;

    let value = match type_id {
        crate::encoder::tag::STRING => {
            Value::String(std::str::from_utf8(payload).map_err(|_| invalid("string is not valid utf-8"))?.to_string())
        }
        crate::encoder::tag::BYTES => Value::Bytes(payload.to_vec()),
        crate::encoder::tag::DOUBLE => Value::Double(f64::from_be_bytes(
            payload.try_into().map_err(|_| invalid("double must be 8 bytes"))?,
        )),
        crate::encoder::tag::FLOAT => Value::Float(f32::from_be_bytes(
            payload.try_into().map_err(|_| invalid("float must be 4 bytes"))?,
        )),
        crate::encoder::tag::INT32 => {
            let mut buf = [0u8; 4];
            buf[4 - payload.len()..].copy_from_slice(payload);
            Value::Int32(i32::from_be_bytes(buf))
        }
        crate::encoder::tag::UINT16 => Value::Uint16(read_uint(payload) as u16),
        crate::encoder::tag::UINT32 => Value::Uint32(read_uint(payload) as u32),
        crate::encoder::tag::UINT64 => Value::Uint64(read_uint(payload) as u64),
        crate::encoder::tag::UINT128 => Value::Uint128(read_uint128(payload)),
        crate::encoder::tag::BOOLEAN => Value::Boolean(length != 0),
        crate::encoder::tag::MAP => {
            let mut map = std::collections::BTreeMap::new();
            let mut cursor = payload_start;
            for _ in 0..length {
                let (key, next) = decode_value(bytes, cursor)?;
                let (val, next2) = decode_value(bytes, next)?;
                let key = key
                    .as_str()
                    .ok_or_else(|| invalid("map key is not a string"))?
                    .to_string();
                map.insert(key, val);
                cursor = next2;
            }
            return Ok((Value::Map(map), cursor));
        }
        crate::encoder::tag::ARRAY => {
            let mut items = Vec::with_capacity(length);
            let mut cursor = payload_start;
            for _ in 0..length {
                let (val, next) = decode_value(bytes, cursor)?;
                items.push(val);
                cursor = next;
            }
            return Ok((Value::Array(items), cursor));
        }
        other => return Err(invalid(&format!("unknown type tag {other}"))),
    };
    Ok((value, payload_end))
}

fn decode_pointer_value(bytes: &[u8], pos: usize, control: u8) -> MmdbResult<(Value, usize)> {
    let size_class = (control >> 3) & 0x03;
    let pointer_len = match size_class {
        0 => 2,
        1 => 3,
        2 => 4,
        3 => 5,
        _ => unreachable!(),
    };
    let pointer_bytes = bytes
        .get(pos..pos + pointer_len)
        .ok_or_else(|| invalid("truncated pointer"))?;
    let target = crate::encoder::decode_pointer(pointer_bytes)? as usize;
    let (value, _) = decode_value(bytes, target)?;
    Ok((value, pos + pointer_len))
}

fn read_uint(payload: &[u8]) -> u64 {
    payload.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn read_uint128(payload: &[u8]) -> u128 {
    payload.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128)
}

fn invalid(msg: &str) -> MmdbError {
    MmdbError::InvalidDatabase(msg.to_string())
}
