//! The typed metadata map written after the metadata magic (spec §6).

use std::collections::BTreeMap;

use crate::error::{MmdbError, MmdbResult};
use crate::value::Value;

/// MMDB binary format version this crate writes and expects to read.
pub const BINARY_FORMAT_MAJOR_VERSION: u16 = 2;
pub const BINARY_FORMAT_MINOR_VERSION: u16 = 0;

/// The parsed, typed form of the metadata map.
///
/// Required keys are pulled out into named fields; anything else present in
/// the map (vendor extensions) is kept in `extra` so a round trip through
/// [`Metadata::into_map`] does not silently drop it.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub node_count: u32,
    pub record_size: u16,
    pub ip_version: u16,
    pub database_type: String,
    pub languages: Vec<String>,
    pub binary_format_major_version: u16,
    pub binary_format_minor_version: u16,
    pub build_epoch: u64,
    pub description: BTreeMap<String, String>,
    pub extra: BTreeMap<String, Value>,
}

impl Metadata {
    /// Validates invariants that `record_size`/`ip_version` must satisfy
    /// regardless of where the metadata came from.
    pub fn validate(&self) -> MmdbResult<()> {
        if self.binary_format_major_version != BINARY_FORMAT_MAJOR_VERSION {
            return Err(MmdbError::InvalidDatabase(format!(
                "unsupported binary_format_major_version {} (only {} is supported)",
                self.binary_format_major_version, BINARY_FORMAT_MAJOR_VERSION
            )));
        }
        if ![24, 28, 32].contains(&self.record_size) {
            return Err(MmdbError::InvalidDatabase(format!(
                "record_size must be 24, 28, or 32, got {}",
                self.record_size
            )));
        }
        if self.ip_version != 4 && self.ip_version != 6 {
            return Err(MmdbError::InvalidDatabase(format!(
                "ip_version must be 4 or 6, got {}",
                self.ip_version
            )));
        }
        Ok(())
    }

    /// Converts back into the generic [`Value`] map form the encoder writes.
    pub fn into_map(self) -> BTreeMap<String, Value> {
        let mut map = self.extra;
        map.insert("node_count".into(), Value::Uint32(self.node_count));
        map.insert("record_size".into(), Value::Uint16(self.record_size));
        map.insert("ip_version".into(), Value::Uint16(self.ip_version));
        map.insert(
            "database_type".into(),
            Value::String(self.database_type),
        );
        map.insert(
            "languages".into(),
            Value::Array(self.languages.into_iter().map(Value::String).collect()),
        );
        map.insert(
            "binary_format_major_version".into(),
            Value::Uint16(self.binary_format_major_version),
        );
        map.insert(
            "binary_format_minor_version".into(),
            Value::Uint16(self.binary_format_minor_version),
        );
        map.insert("build_epoch".into(), Value::Uint64(self.build_epoch));
        map.insert(
            "description".into(),
            Value::Map(
                self.description
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            ),
        );
        map
    }
}

impl TryFrom<&Value> for Metadata {
    type Error = MmdbError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let map = value
            .as_map()
            .ok_or_else(|| MmdbError::InvalidDatabase("metadata is not a map".into()))?;

        let required_u64 = |key: &str| -> MmdbResult<u64> {
            map.get(key)
                .and_then(Value::as_u64)
                .ok_or_else(|| missing(key))
        };
        let required_str = |key: &str| -> MmdbResult<String> {
            map.get(key)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| missing(key))
        };

        let languages = match map.get("languages") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_owned)
                        .ok_or_else(|| MmdbError::InvalidDatabase("languages entry is not a string".into()))
                })
                .collect::<MmdbResult<Vec<_>>>()?,
            Some(_) => return Err(MmdbError::InvalidDatabase("languages is not an array".into())),
            None => return Err(missing("languages")),
        };

        let description = match map.get("description") {
            Some(Value::Map(m)) => m
                .iter()
                .map(|(k, v)| {
                    v.as_str()
                        .map(|s| (k.clone(), s.to_owned()))
                        .ok_or_else(|| MmdbError::InvalidDatabase("description value is not a string".into()))
                })
                .collect::<MmdbResult<BTreeMap<_, _>>>()?,
            Some(_) => return Err(MmdbError::InvalidDatabase("description is not a map".into())),
            None => return Err(missing("description")),
        };

        const KNOWN: &[&str] = &[
            "node_count",
            "record_size",
            "ip_version",
            "database_type",
            "languages",
            "binary_format_major_version",
            "binary_format_minor_version",
            "build_epoch",
            "description",
        ];
        let extra = map
            .iter()
            .filter(|(k, _)| !KNOWN.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let metadata = Metadata {
            node_count: required_u64("node_count")? as u32,
            record_size: required_u64("record_size")? as u16,
            ip_version: required_u64("ip_version")? as u16,
            database_type: required_str("database_type")?,
            languages,
            binary_format_major_version: required_u64("binary_format_major_version")? as u16,
            binary_format_minor_version: required_u64("binary_format_minor_version")? as u16,
            build_epoch: required_u64("build_epoch")?,
            description,
            extra,
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

fn missing(key: &str) -> MmdbError {
    MmdbError::InvalidDatabase(format!("metadata is missing required key \"{key}\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metadata {
        Metadata {
            node_count: 10,
            record_size: 28,
            ip_version: 6,
            database_type: "mrt2mmdb-asn".into(),
            languages: vec!["en".into()],
            binary_format_major_version: BINARY_FORMAT_MAJOR_VERSION,
            binary_format_minor_version: BINARY_FORMAT_MINOR_VERSION,
            build_epoch: 1_700_000_000,
            description: BTreeMap::from([("en".to_string(), "test db".to_string())]),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn round_trips_through_value_map() {
        let metadata = sample();
        let value = Value::Map(metadata.clone().into_map());
        let back = Metadata::try_from(&value).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn rejects_bad_record_size() {
        let mut metadata = sample();
        metadata.record_size = 30;
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn rejects_unsupported_major_version() {
        let mut metadata = sample();
        metadata.binary_format_major_version = 3;
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let mut map = sample().into_map();
        map.remove("database_type");
        let err = Metadata::try_from(&Value::Map(map)).unwrap_err();
        assert!(matches!(err, MmdbError::InvalidDatabase(_)));
    }
}
