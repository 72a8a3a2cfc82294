//! The enrichment pipeline (spec §4.E): turns an MRT table dump plus an ASN
//! description source into the `(prefix, record)` pairs the writer consumes.
//!
//! `asn_table ← parse_ref_mmdb ∪ parse_delimited_file; routes ← parse_mrt;
//! records ← join(routes, asn_table); writer.insert(records); writer.write`

pub mod asn;
pub mod merge;
pub mod mrt;
