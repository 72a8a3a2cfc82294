//! Prometheus-style text metrics for the `build` subcommand.
//!
//! Grounded on `original_source/mrt2mmdb/prometheus.py`'s `output_prometheus`:
//! a single formatted string, not a metrics server or schema (spec §1 treats
//! the metrics template itself as out of scope, but ambient observability is
//! carried per `SPEC_FULL.md` §6).

use std::time::Duration;

/// Count plus wall-clock duration for one pipeline stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageStats {
    pub count: u64,
    pub duration: Duration,
}

impl StageStats {
    pub fn per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.count as f64 / secs
        } else {
            0.0
        }
    }
}

/// Everything the `build` subcommand has on hand once a run finishes.
pub struct BuildMetrics {
    pub asn_table: StageStats,
    pub mrt_load: StageStats,
    pub convert: StageStats,
    pub missing_prefixes: u64,
    pub missing_asns: u64,
    pub lastrun_timestamp: u64,
    pub mrt_file_epoch: u64,
    pub reference_mmdb_epoch: u64,
}

/// Renders the metrics in Prometheus's text exposition format.
pub fn render(m: &BuildMetrics) -> String {
    format!(
        "# durations are seconds\n\
mrt2mmdb_description_asn_prefixes {asn_count}\n\
mrt2mmdb_description_asn_prefixes_duration {asn_dur:.0}\n\
mrt2mmdb_description_asn_prefixes_per_second {asn_ps:.2}\n\
mrt2mmdb_dictionary_load_prefixes {load_count}\n\
mrt2mmdb_dictionary_load_prefixes_duration {load_dur:.0}\n\
mrt2mmdb_dictionary_load_prefixes_per_second {load_ps:.2}\n\
mrt2mmdb_conversions {conv_count}\n\
mrt2mmdb_conversions_duration {conv_dur:.0}\n\
mrt2mmdb_conversions_per_second {conv_ps:.2}\n\
mrt2mmdb_prefixes_no_description {missing_prefixes}\n\
mrt2mmdb_asn_no_description {missing_asns}\n\
mrt2mmdb_lastrun_timestamp {lastrun}\n\
mrt2mmdb_mrt_file_creation_timestamp {mrt_epoch}\n\
mrt2mmdb_template_mmdb_file_creation_timestamp {ref_epoch}\n\
mrt2mmdb_version 1.0\n",
        asn_count = m.asn_table.count,
        asn_dur = m.asn_table.duration.as_secs_f64(),
        asn_ps = m.asn_table.per_second(),
        load_count = m.mrt_load.count,
        load_dur = m.mrt_load.duration.as_secs_f64(),
        load_ps = m.mrt_load.per_second(),
        conv_count = m.convert.count,
        conv_dur = m.convert.duration.as_secs_f64(),
        conv_ps = m.convert.per_second(),
        missing_prefixes = m.missing_prefixes,
        missing_asns = m.missing_asns,
        lastrun = m.lastrun_timestamp,
        mrt_epoch = m.mrt_file_epoch,
        ref_epoch = m.reference_mmdb_epoch,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_every_line_once() {
        let metrics = BuildMetrics {
            asn_table: StageStats { count: 100, duration: Duration::from_secs(2) },
            mrt_load: StageStats { count: 5000, duration: Duration::from_secs(10) },
            convert: StageStats { count: 5000, duration: Duration::from_secs(1) },
            missing_prefixes: 3,
            missing_asns: 2,
            lastrun_timestamp: 1_700_000_000,
            mrt_file_epoch: 1_699_000_000,
            reference_mmdb_epoch: 1_698_000_000,
        };
        let text = render(&metrics);
        assert_eq!(text.matches("mrt2mmdb_version 1.0").count(), 1);
        assert!(text.contains("mrt2mmdb_conversions 5000"));
        assert!(text.contains("mrt2mmdb_asn_no_description 2"));
    }

    #[test]
    fn zero_duration_reports_zero_per_second_without_panicking() {
        let stats = StageStats::default();
        assert_eq!(stats.per_second(), 0.0);
    }
}
