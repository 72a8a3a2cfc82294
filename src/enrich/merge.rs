//! Joins MRT routes against an [`AsnTable`] to produce the final
//! `(prefix, record)` pairs the writer inserts (spec §4.E).
//!
//! Grounded on `original_source/mrt2mmdb/make_mmdb.py`'s `convert_mrt_mmdb`:
//! destination ASN is the last hop of the AS path, looked up in the table;
//! misses are collected rather than aborting the run (spec §7:
//! `MissingRecord` is "reported, not thrown").

use std::collections::{BTreeMap, BTreeSet};

use ipnet::IpNet;
use rayon::prelude::*;

use crate::enrich::asn::AsnTable;
use crate::enrich::mrt::RibEntry;
use crate::value::Value;

/// One finished `(prefix, record)` pair ready for [`crate::writer::Writer::insert`].
pub struct EnrichedRoute {
    pub prefix: IpNet,
    pub data: Value,
}

/// Joins `routes` against `asn_table`, returning the enriched records
/// (sorted most-specific prefix first, per spec §4.E's insertion-order
/// instruction so the writer sees longest prefixes first) and the sorted,
/// deduplicated list of ASNs that had no description.
///
/// The per-route lookup is embarrassingly parallel (spec §5: "external
/// parallelism... confined to the enrichment pipeline"), so it runs over
/// `rayon`'s `par_iter`; the result is collected back into one `Vec` (a join
/// barrier) before this function returns, preserving the writer's
/// single-threaded invariant.
pub fn join(routes: &[RibEntry], asn_table: &AsnTable) -> (Vec<EnrichedRoute>, Vec<u32>) {
    let joined: Vec<(EnrichedRoute, Option<u32>)> = routes
        .par_iter()
        .filter_map(|route| {
            let destination_asn = route.origin_as()?;
            let organization = asn_table.get(destination_asn).unwrap_or("").to_string();
            let missing = if organization.is_empty() { Some(destination_asn) } else { None };

            let mut record = BTreeMap::new();
            record.insert(
                "autonomous_system_number".to_string(),
                Value::Uint32(destination_asn),
            );
            record.insert(
                "autonomous_system_organization".to_string(),
                Value::String(organization),
            );
            record.insert("prefix".to_string(), Value::String(route.prefix.to_string()));
            record.insert("path".to_string(), Value::String(route.as_path_text.clone()));

            Some((
                EnrichedRoute {
                    prefix: route.prefix,
                    data: Value::Map(record),
                },
                missing,
            ))
        })
        .collect();

    let mut missing_set: BTreeSet<u32> = BTreeSet::new();
    let mut records: Vec<EnrichedRoute> = Vec::with_capacity(joined.len());
    for (record, missing) in joined {
        if let Some(asn) = missing {
            missing_set.insert(asn);
        }
        records.push(record);
    }

    records.sort_by_key(|r| std::cmp::Reverse(r.prefix.prefix_len()));
    (records, missing_set.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(prefix: &str, as_path: Vec<u32>) -> RibEntry {
        let as_path_text = as_path.iter().map(u32::to_string).collect::<Vec<_>>().join(" ");
        RibEntry {
            prefix: prefix.parse().unwrap(),
            as_path,
            as_path_text,
        }
    }

    #[test]
    fn missing_description_reported_once_and_empty_string_in_record() {
        let mut table = AsnTable::new();
        table.insert(1, "one".to_string());
        let routes = vec![
            route("8.8.8.0/24", vec![1, 2, 3, 99999]),
            route("1.1.1.0/24", vec![2, 99999]),
        ];

        let (records, missing) = join(&routes, &table);
        assert_eq!(missing, vec![99999]);
        for r in &records {
            let map = r.data.as_map().unwrap();
            assert_eq!(
                map["autonomous_system_organization"],
                Value::String(String::new())
            );
            assert_eq!(map["autonomous_system_number"], Value::Uint32(99999));
        }
    }

    #[test]
    fn found_description_fills_organization_and_is_not_missing() {
        let mut table = AsnTable::new();
        table.insert(15169, "Google LLC".to_string());
        let routes = vec![route("8.8.8.0/24", vec![65000, 15169])];

        let (records, missing) = join(&routes, &table);
        assert!(missing.is_empty());
        let map = records[0].data.as_map().unwrap();
        assert_eq!(
            map["autonomous_system_organization"],
            Value::String("Google LLC".to_string())
        );
        assert_eq!(map["path"], Value::String("65000 15169".to_string()));
    }

    #[test]
    fn sorted_most_specific_prefix_first() {
        let table = AsnTable::new();
        let routes = vec![
            route("10.0.0.0/8", vec![1]),
            route("10.1.0.0/16", vec![1]),
            route("0.0.0.0/0", vec![1]),
        ];
        let (records, _) = join(&routes, &table);
        let lens: Vec<u8> = records.iter().map(|r| r.prefix.prefix_len()).collect();
        assert_eq!(lens, vec![16, 8, 0]);
    }

    #[test]
    fn routes_without_as_path_are_skipped() {
        let table = AsnTable::new();
        let routes = vec![route("10.0.0.0/8", vec![])];
        let (records, missing) = join(&routes, &table);
        assert!(records.is_empty());
        assert!(missing.is_empty());
    }
}
