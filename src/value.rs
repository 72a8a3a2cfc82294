//! The recursive tagged value type stored in an MMDB data section.

use std::collections::BTreeMap;

/// A single MMDB data-section value.
///
/// `Map` keys are ordered (`BTreeMap`) so that two maps built from the same
/// key/value pairs in different insertion order compare equal and therefore
/// coalesce under the encoder's pointer cache (see [`crate::encoder`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Map(BTreeMap<String, Value>),
    Array(Vec<Value>),
    String(String),
    Bytes(Vec<u8>),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Uint128(u128),
    Int32(i32),
    Double(f64),
    Float(f32),
    Boolean(bool),
}

impl Value {
    /// Picks the smallest unsigned width that fits `value`, mirroring the
    /// reference encoder's `python_type_id` auto-selection for untagged
    /// integers.
    pub fn auto_uint(value: u128) -> Value {
        if value <= u16::MAX as u128 {
            Value::Uint16(value as u16)
        } else if value <= u32::MAX as u128 {
            Value::Uint32(value as u32)
        } else if value <= u64::MAX as u128 {
            Value::Uint64(value as u64)
        } else {
            Value::Uint128(value)
        }
    }

    /// Picks `Int32` for negative values, otherwise defers to [`Value::auto_uint`].
    pub fn auto_int(value: i64) -> Value {
        if value < 0 {
            Value::Int32(value as i32)
        } else {
            Value::auto_uint(value as u128)
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Uint16(v) => Some(v as u64),
            Value::Uint32(v) => Some(v as u64),
            Value::Uint64(v) => Some(v),
            Value::Uint128(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Removes `keys` from every map at any depth, recursing through arrays
    /// element-wise. Used by the trimmer (`crate::trim`) to drop fields from
    /// a record without disturbing its other structure.
    pub fn without_keys(&self, keys: &[String]) -> Value {
        match self {
            Value::Map(m) => Value::Map(
                m.iter()
                    .filter(|(k, _)| !keys.iter().any(|d| d == *k))
                    .map(|(k, v)| (k.clone(), v.without_keys(keys)))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| v.without_keys(keys)).collect())
            }
            other => other.clone(),
        }
    }
}

/// A hashable, order-preserving canonicalization of a [`Value`], used as the
/// pointer-cache key in [`crate::encoder::Encoder`].
///
/// `f32`/`f64` are not `Eq`/`Hash`, so floats are canonicalized by their bit
/// pattern rather than by value - this matches IEEE-754 bit-exact reuse,
/// which is all the pointer cache needs (we are deduplicating the exact
/// bytes that would be written, not doing numeric comparison).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    Map(Vec<(String, Fingerprint)>),
    Array(Vec<Fingerprint>),
    String(String),
    Bytes(Vec<u8>),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Uint128(u128),
    Int32(i32),
    Double(u64),
    Float(u32),
    Boolean(bool),
}

impl From<&Value> for Fingerprint {
    fn from(value: &Value) -> Self {
        match value {
            // BTreeMap already iterates in sorted key order, so this is the
            // "key-sorted at fingerprint time" canonicalization spec.md asks for.
            Value::Map(m) => {
                Fingerprint::Map(m.iter().map(|(k, v)| (k.clone(), v.into())).collect())
            }
            Value::Array(items) => Fingerprint::Array(items.iter().map(Into::into).collect()),
            Value::String(s) => Fingerprint::String(s.clone()),
            Value::Bytes(b) => Fingerprint::Bytes(b.clone()),
            Value::Uint16(v) => Fingerprint::Uint16(*v),
            Value::Uint32(v) => Fingerprint::Uint32(*v),
            Value::Uint64(v) => Fingerprint::Uint64(*v),
            Value::Uint128(v) => Fingerprint::Uint128(*v),
            Value::Int32(v) => Fingerprint::Int32(*v),
            Value::Double(v) => Fingerprint::Double(v.to_bits()),
            Value::Float(v) => Fingerprint::Float(v.to_bits()),
            Value::Boolean(v) => Fingerprint::Boolean(*v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_uint_picks_smallest_width() {
        assert_eq!(Value::auto_uint(0), Value::Uint16(0));
        assert_eq!(Value::auto_uint(255), Value::Uint16(255));
        assert_eq!(Value::auto_uint(65536), Value::Uint32(65536));
        assert_eq!(
            Value::auto_uint(u64::MAX as u128 + 1),
            Value::Uint128(u64::MAX as u128 + 1)
        );
    }

    #[test]
    fn auto_int_negative_is_int32() {
        assert_eq!(Value::auto_int(-1), Value::Int32(-1));
    }

    #[test]
    fn without_keys_recurses_through_maps_and_arrays() {
        let mut inner = BTreeMap::new();
        inner.insert("geoname_id".to_string(), Value::Uint32(1));
        inner.insert("latitude".to_string(), Value::Double(1.0));
        let mut outer = BTreeMap::new();
        outer.insert("location".to_string(), Value::Map(inner));
        outer.insert(
            "subdivisions".to_string(),
            Value::Array(vec![Value::Map(BTreeMap::from([(
                "geoname_id".to_string(),
                Value::Uint32(2),
            )]))]),
        );
        let trimmed = Value::Map(outer).without_keys(&["geoname_id".to_string()]);
        let Value::Map(m) = trimmed else { panic!() };
        let Value::Map(loc) = &m["location"] else {
            panic!()
        };
        assert!(!loc.contains_key("geoname_id"));
        assert!(loc.contains_key("latitude"));
        let Value::Array(subs) = &m["subdivisions"] else {
            panic!()
        };
        let Value::Map(sub0) = &subs[0] else { panic!() };
        assert!(!sub0.contains_key("geoname_id"));
    }

    #[test]
    fn fingerprint_map_order_independent() {
        let a = Value::Map(BTreeMap::from([
            ("a".to_string(), Value::Uint16(1)),
            ("b".to_string(), Value::Uint16(2)),
        ]));
        let b = Value::Map(BTreeMap::from([
            ("b".to_string(), Value::Uint16(2)),
            ("a".to_string(), Value::Uint16(1)),
        ]));
        assert_eq!(Fingerprint::from(&a), Fingerprint::from(&b));
    }
}
