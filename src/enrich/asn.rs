//! ASN -> organization-description table assembly (spec §4.E).
//!
//! Two sources feed the same table: an existing reference MMDB (grounded on
//! `original_source/mrt2mmdb/make_mmdb.py`'s `make_asn`) and a delimited
//! (CSV/TSV) file (grounded on `original_source/mrt2mmdb/flat_file.py`'s
//! `parse_flatfile`). The delimited file is merged on top of the MMDB table
//! unless `custom_only` is set, in which case it replaces it entirely.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, warn};

use crate::error::{MmdbError, MmdbResult};
use crate::reader::Reader;

/// How many bytes of a delimited file to sample when guessing its dialect,
/// matching Python's `csv.Sniffer().sniff(csvfile.read(1024))`.
const DIALECT_SAMPLE_BYTES: usize = 1024;

/// ASN -> organization-description lookup table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsnTable {
    descriptions: BTreeMap<u32, String>,
}

impl AsnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    pub fn get(&self, asn: u32) -> Option<&str> {
        self.descriptions.get(&asn).map(String::as_str)
    }

    /// All ASNs present in the table, in ascending order.
    pub fn asns(&self) -> impl Iterator<Item = u32> + '_ {
        self.descriptions.keys().copied()
    }

    /// Inserts or overwrites `asn`'s description; last write wins on
    /// collision (spec §4.E).
    pub fn insert(&mut self, asn: u32, description: String) {
        self.descriptions.insert(asn, description);
    }

    /// Merges `other`'s entries on top of `self` (later entries win).
    pub fn merge(&mut self, other: AsnTable) {
        self.descriptions.extend(other.descriptions);
    }

    /// Builds a table from an existing reference MMDB: every record's
    /// `autonomous_system_number` -> `autonomous_system_organization`,
    /// dropping prefixes whose record lacks either key.
    pub fn from_reference_mmdb(reader: &Reader) -> MmdbResult<AsnTable> {
        let mut table = AsnTable::new();
        let mut skipped = 0usize;
        for leaf in reader.iter() {
            let leaf = leaf?;
            let map = match leaf.value.as_map() {
                Some(m) => m,
                None => {
                    skipped += 1;
                    continue;
                }
            };
            let (Some(asn), Some(org)) = (
                map.get("autonomous_system_number").and_then(|v| v.as_u64()),
                map.get("autonomous_system_organization").and_then(|v| v.as_str()),
            ) else {
                skipped += 1;
                continue;
            };
            table.insert(asn as u32, org.to_string());
        }
        if skipped > 0 {
            debug!("reference MMDB: skipped {skipped} record(s) without ASN/org fields");
        }
        Ok(table)
    }

    /// Builds a table from a CSV/TSV file: column 0 is the ASN, column 2 is
    /// the description (spec §6). The delimiter is sniffed from the first
    /// KiB by counting candidate separators, matching the Python sniffer's
    /// job without requiring a full grammar.
    pub fn from_delimited_file<P: AsRef<Path>>(path: P) -> MmdbResult<AsnTable> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MmdbError::SourceUnavailable(path.display().to_string())
            } else {
                MmdbError::Io(e)
            }
        })?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let delimiter = sniff_delimiter(&contents[..contents.len().min(DIALECT_SAMPLE_BYTES)]);
        let mut table = AsnTable::new();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(contents.as_bytes());
        for result in reader.records() {
            let record = result?;
            let Some(asn_field) = record.get(0) else {
                continue;
            };
            let Some(description) = record.get(2) else {
                warn!("delimited ASN row missing column 2, skipping: {record:?}");
                continue;
            };
            let Ok(asn) = asn_field.trim().parse::<u32>() else {
                warn!("delimited ASN row has a non-numeric ASN column, skipping: {asn_field}");
                continue;
            };
            table.insert(asn, description.to_string());
        }
        Ok(table)
    }
}

/// Picks comma or tab, whichever appears more often in `sample`.
fn sniff_delimiter(sample: &str) -> u8 {
    let commas = sample.matches(',').count();
    let tabs = sample.matches('\t').count();
    if tabs > commas {
        b'\t'
    } else {
        b','
    }
}
