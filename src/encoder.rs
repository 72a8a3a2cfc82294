//! Byte-level MMDB data-section encoder with a pointer cache for structural
//! sharing. See spec §4.A ("MMDB Encoder").

use std::collections::{BTreeMap, HashMap};

use crate::error::{MmdbError, MmdbResult};
use crate::value::{Fingerprint, Value};

/// MMDB control-byte type tags (MaxMind-DB-spec "Data section").
pub mod tag {
    pub const POINTER: u8 = 1;
    pub const STRING: u8 = 2;
    pub const DOUBLE: u8 = 3;
    pub const BYTES: u8 = 4;
    pub const UINT16: u8 = 5;
    pub const UINT32: u8 = 6;
    pub const MAP: u8 = 7;
    pub const INT32: u8 = 8;
    pub const UINT64: u8 = 9;
    pub const UINT128: u8 = 10;
    pub const ARRAY: u8 = 11;
    pub const BOOLEAN: u8 = 14;
    pub const FLOAT: u8 = 15;
}

/// Lengths at or above this value cannot be represented by the five-bit
/// length-class scheme (spec §4.A).
const MAX_ENCODABLE_LENGTH: usize = 16_843_036;

/// Pointer offsets at or above this value need the full 32-bit, 5-byte form.
const POINTER_4BYTE_MAX: u64 = 134_744_064;
/// Pointer offsets at or above this value need the 4-byte form.
const POINTER_3BYTE_MAX: u64 = 526_336;
/// Pointer offsets at or above this value need the 3-byte form.
const POINTER_2BYTE_MAX: u64 = 2_048;

/// Writes a control byte (and any length-extension bytes) for `type_id`/`length`.
fn make_header(type_id: u8, length: usize) -> MmdbResult<Vec<u8>> {
    if length >= MAX_ENCODABLE_LENGTH {
        return Err(MmdbError::EncodeOverflow(format!(
            "length {length} exceeds the maximum encodable length of {MAX_ENCODABLE_LENGTH}"
        )));
    }

    let (five_bits, extra): (u8, Vec<u8>) = if length >= 65_821 {
        let l = (length - 65_821) as u32;
        (31, vec![(l >> 16) as u8, (l >> 8) as u8, l as u8])
    } else if length >= 285 {
        let l = (length - 285) as u32;
        (30, vec![(l >> 8) as u8, l as u8])
    } else if length >= 29 {
        let l = (length - 29) as u32;
        (29, vec![l as u8])
    } else {
        (length as u8, Vec::new())
    };

    let mut out = if type_id <= 7 {
        vec![(type_id << 5) + five_bits]
    } else {
        vec![five_bits, type_id - 7]
    };
    out.extend(extra);
    Ok(out)
}

/// Encodes a data-section pointer to `offset`, using the smallest of the
/// four size classes the offset fits in.
pub fn encode_pointer(offset: u64) -> MmdbResult<Vec<u8>> {
    if offset >= POINTER_4BYTE_MAX {
        let mut out = vec![0x38u8];
        let offset: u32 = offset
            .try_into()
            .map_err(|_| MmdbError::EncodeOverflow(format!("pointer offset {offset} too large")))?;
        out.extend_from_slice(&offset.to_be_bytes());
        Ok(out)
    } else if offset >= POINTER_3BYTE_MAX {
        let v = offset - POINTER_3BYTE_MAX;
        Ok(vec![
            0x30 + ((v >> 24) & 0x07) as u8,
            ((v >> 16) & 0xFF) as u8,
            ((v >> 8) & 0xFF) as u8,
            (v & 0xFF) as u8,
        ])
    } else if offset >= POINTER_2BYTE_MAX {
        let v = offset - POINTER_2BYTE_MAX;
        Ok(vec![
            0x28 + ((v >> 16) & 0x07) as u8,
            ((v >> 8) & 0xFF) as u8,
            (v & 0xFF) as u8,
        ])
    } else {
        Ok(vec![0x20 + ((offset >> 8) & 0x07) as u8, (offset & 0xFF) as u8])
    }
}

/// Decodes a data-section pointer back into its target offset. The exact
/// inverse of [`encode_pointer`]; see spec §9 ("pointer inversion in the
/// trimmer... the authoritative form is single-sourced here").
pub fn decode_pointer(bytes: &[u8]) -> MmdbResult<u64> {
    let control = *bytes
        .first()
        .ok_or_else(|| MmdbError::InvalidPointer("empty pointer".into()))?;
    if control & 0xE0 != 0x20 {
        return Err(MmdbError::InvalidPointer(format!(
            "control byte {control:#04x} is not a pointer"
        )));
    }
    let size_class = (control >> 3) & 0x03;
    let base = (control & 0x07) as u64;
    match size_class {
        0 => {
            expect_len(bytes, 2)?;
            Ok((base << 8) | bytes[1] as u64)
        }
        1 => {
            expect_len(bytes, 3)?;
            Ok(((base << 16) | ((bytes[1] as u64) << 8) | bytes[2] as u64) + POINTER_2BYTE_MAX)
        }
        2 => {
            expect_len(bytes, 4)?;
            Ok(((base << 24) | ((bytes[1] as u64) << 16) | ((bytes[2] as u64) << 8) | bytes[3] as u64)
                + POINTER_3BYTE_MAX)
        }
        3 => {
            expect_len(bytes, 5)?;
            Ok(u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as u64)
        }
        _ => unreachable!("size_class is a 2-bit field"),
    }
}

fn expect_len(bytes: &[u8], len: usize) -> MmdbResult<()> {
    if bytes.len() != len {
        return Err(MmdbError::InvalidPointer(format!(
            "expected a {len}-byte pointer, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

fn encode_uint(type_id: u8, max_len: usize, value: u128) -> MmdbResult<Vec<u8>> {
    if max_len < 16 {
        let limit = 1u128 << (max_len * 8);
        if value >= limit {
            return Err(MmdbError::EncodeOverflow(format!(
                "value {value} does not fit in {} bits",
                max_len * 8
            )));
        }
    }
    let mut bytes = Vec::new();
    let mut v = value;
    while v != 0 {
        bytes.insert(0, (v & 0xFF) as u8);
        v >>= 8;
    }
    let mut out = make_header(type_id, bytes.len())?;
    out.extend(bytes);
    Ok(out)
}

fn value_type_id(value: &Value) -> u8 {
    match value {
        Value::Map(_) => tag::MAP,
        Value::Array(_) => tag::ARRAY,
        Value::String(_) => tag::STRING,
        Value::Bytes(_) => tag::BYTES,
        Value::Uint16(_) => tag::UINT16,
        Value::Uint32(_) => tag::UINT32,
        Value::Uint64(_) => tag::UINT64,
        Value::Uint128(_) => tag::UINT128,
        Value::Int32(_) => tag::INT32,
        Value::Double(_) => tag::DOUBLE,
        Value::Float(_) => tag::FLOAT,
        Value::Boolean(_) => tag::BOOLEAN,
    }
}

fn as_u128(value: &Value) -> MmdbResult<u128> {
    match *value {
        Value::Uint16(v) => Ok(v as u128),
        Value::Uint32(v) => Ok(v as u128),
        Value::Uint64(v) => Ok(v as u128),
        Value::Uint128(v) => Ok(v),
        _ => Err(MmdbError::EncodeOverflow(
            "expected an unsigned integer value".into(),
        )),
    }
}

/// Encodes the MMDB data section with structural sharing.
///
/// Every unique sub-value (by [`Fingerprint`]) is written once; repeat
/// occurrences are replaced with a short pointer into the first copy. The
/// writer ([`crate::writer::Writer`]) owns one `Encoder` per output file; the
/// trimmer ([`crate::trim`]) creates a fresh one per run.
pub struct Encoder {
    cache_enabled: bool,
    data: Vec<u8>,
    pointer_cache: HashMap<Fingerprint, Vec<u8>>,
}

impl Encoder {
    pub fn new(cache_enabled: bool) -> Self {
        Self {
            cache_enabled,
            data: Vec::new(),
            pointer_cache: HashMap::new(),
        }
    }

    /// Number of bytes written to the data section so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the encoder, returning the accumulated data section.
    pub fn into_data_section(self) -> Vec<u8> {
        self.data
    }

    /// Encodes `value`, auto-selecting its wire type from the `Value` variant.
    pub fn encode(&mut self, value: &Value) -> MmdbResult<Vec<u8>> {
        self.encode_with(value, None)
    }

    /// Encodes `value` forcing `type_id` (used by [`encode_metadata`] for
    /// known metadata keys whose width is fixed regardless of magnitude).
    pub fn encode_typed(&mut self, value: &Value, type_id: u8) -> MmdbResult<Vec<u8>> {
        self.encode_with(value, Some(type_id))
    }

    fn encode_with(&mut self, value: &Value, forced_type: Option<u8>) -> MmdbResult<Vec<u8>> {
        if self.cache_enabled && forced_type.is_none() {
            let fingerprint = Fingerprint::from(value);
            if let Some(cached) = self.pointer_cache.get(&fingerprint) {
                return Ok(cached.clone());
            }
            let raw = self.encode_raw(value, None)?;
            let offset = self.data.len() as u64;
            self.data.extend_from_slice(&raw);
            let pointer = encode_pointer(offset)?;
            self.pointer_cache.insert(fingerprint, pointer.clone());
            Ok(pointer)
        } else {
            let raw = self.encode_raw(value, forced_type)?;
            self.data.extend_from_slice(&raw);
            Ok(raw)
        }
    }

    fn encode_raw(&mut self, value: &Value, forced_type: Option<u8>) -> MmdbResult<Vec<u8>> {
        let type_id = forced_type.unwrap_or_else(|| value_type_id(value));
        match value {
            Value::Map(m) => {
                let mut out = make_header(tag::MAP, m.len())?;
                for (k, v) in m {
                    out.extend(self.encode(&Value::String(k.clone()))?);
                    out.extend(self.encode(v)?);
                }
                Ok(out)
            }
            Value::Array(items) => {
                let mut out = make_header(tag::ARRAY, items.len())?;
                for item in items {
                    out.extend(self.encode(item)?);
                }
                Ok(out)
            }
            Value::String(s) => {
                let mut out = make_header(tag::STRING, s.len())?;
                out.extend_from_slice(s.as_bytes());
                Ok(out)
            }
            Value::Bytes(b) => {
                let mut out = make_header(tag::BYTES, b.len())?;
                out.extend_from_slice(b);
                Ok(out)
            }
            Value::Uint16(_) | Value::Uint32(_) | Value::Uint64(_) | Value::Uint128(_) => {
                let max_len = match type_id {
                    tag::UINT16 => 2,
                    tag::UINT32 => 4,
                    tag::UINT64 => 8,
                    tag::UINT128 => 16,
                    other => {
                        return Err(MmdbError::EncodeOverflow(format!(
                            "type id {other} is not a valid unsigned-integer width"
                        )))
                    }
                };
                encode_uint(type_id, max_len, as_u128(value)?)
            }
            Value::Int32(v) => {
                let mut out = make_header(tag::INT32, 4)?;
                out.extend_from_slice(&v.to_be_bytes());
                Ok(out)
            }
            Value::Double(v) => {
                let mut out = make_header(tag::DOUBLE, 8)?;
                out.extend_from_slice(&v.to_be_bytes());
                Ok(out)
            }
            Value::Float(v) => {
                let mut out = make_header(tag::FLOAT, 4)?;
                out.extend_from_slice(&v.to_be_bytes());
                Ok(out)
            }
            Value::Boolean(b) => make_header(tag::BOOLEAN, if *b { 1 } else { 0 }),
        }
    }
}

/// Integer widths that metadata keys must use regardless of their magnitude,
/// matching the reference encoder's `encode_meta`.
fn metadata_type_override(key: &str) -> Option<u8> {
    match key {
        "node_count" => Some(tag::UINT32),
        "record_size" | "ip_version" | "binary_format_major_version"
        | "binary_format_minor_version" => Some(tag::UINT16),
        "build_epoch" => Some(tag::UINT64),
        _ => None,
    }
}

/// Encodes the metadata map written verbatim after the metadata magic (see
/// spec §6). Unlike [`Encoder::encode`], this never goes through the pointer
/// cache: the metadata map is not referenced by pointer from anywhere, so
/// there is nothing to deduplicate, and it must be self-contained.
pub fn encode_metadata(meta: &BTreeMap<String, Value>) -> MmdbResult<Vec<u8>> {
    let mut encoder = Encoder::new(false);
    let mut out = make_header(tag::MAP, meta.len())?;
    for (k, v) in meta {
        out.extend(encoder.encode(&Value::String(k.clone()))?);
        match metadata_type_override(k) {
            Some(type_id) => out.extend(encoder.encode_typed(v, type_id)?),
            None => out.extend(encoder.encode(v)?),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_sizing_boundaries() {
        let cases: [(u64, usize); 7] = [
            (0, 2),
            (2047, 2),
            (2048, 3),
            (526_335, 3),
            (526_336, 4),
            (134_744_063, 4),
            (134_744_064, 5),
        ];
        for (offset, expected_len) in cases {
            let bytes = encode_pointer(offset).unwrap();
            assert_eq!(bytes.len(), expected_len, "offset {offset}");
            assert_eq!(decode_pointer(&bytes).unwrap(), offset, "offset {offset}");
        }
    }

    #[test]
    fn integer_width_auto_select() {
        let mut e = Encoder::new(false);
        assert_eq!(e.encode(&Value::auto_uint(0)).unwrap(), vec![0xa0]);
        assert_eq!(e.encode(&Value::auto_uint(255)).unwrap(), vec![0xa1, 0xff]);
        let encoded = e.encode(&Value::auto_uint(65536)).unwrap();
        assert_eq!(encoded[0] >> 5, tag::UINT32);
        assert_eq!(encoded.len(), 1 + 3);
        let negative = e.encode(&Value::auto_int(-1)).unwrap();
        assert_eq!(negative[0] >> 5, tag::INT32);
        assert_eq!(negative.len(), 1 + 4);
        let big = e.encode(&Value::auto_uint(1u128 << 65)).unwrap();
        assert_eq!(big[0] >> 5, 0); // extended type tag
        assert_eq!(big[1], tag::UINT128 - 7);
    }

    #[test]
    fn pointer_reuse_dedups_data_section() {
        let mut e = Encoder::new(true);
        let shared = Value::String("AS15169 Google LLC".into());
        let first = e.encode(&shared).unwrap();
        let before = e.len();
        let second = e.encode(&shared).unwrap();
        assert_eq!(e.len(), before, "second encode must not grow the data section");
        assert_eq!(first, second);
        assert!(second.len() <= 5);
    }

    #[test]
    fn round_trip_map_structurally() {
        let mut m = BTreeMap::new();
        m.insert("a".to_string(), Value::Uint16(7));
        m.insert("b".to_string(), Value::String("x".into()));
        let value = Value::Map(m);
        let mut e = Encoder::new(false);
        let bytes = e.encode(&value).unwrap();
        // header byte: type MAP (7), length 2
        assert_eq!(bytes[0], (tag::MAP << 5) | 2);
    }

    #[test]
    fn length_overflow_rejected() {
        let err = make_header(tag::BYTES, MAX_ENCODABLE_LENGTH).unwrap_err();
        assert!(matches!(err, MmdbError::EncodeOverflow(_)));
    }
}
