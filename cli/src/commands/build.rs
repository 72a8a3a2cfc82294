use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use mrt2mmdb::enrich::asn::AsnTable;
use mrt2mmdb::enrich::merge;
use mrt2mmdb::enrich::mrt;
use mrt2mmdb::metrics::{BuildMetrics, StageStats};
use mrt2mmdb::{Reader, Writer, WriterOptions};

use crate::error::CliResult;
use crate::utils::progress::ProgressReporter;

/// Builds an MMDB file from an MRT table dump, enriched with ASN descriptions.
///
/// Grounded on `original_source/mrt2mmdb/make_mmdb.py`'s `main`: assemble the
/// ASN table, load the MRT file, join, write.
#[derive(Args)]
pub struct BuildArgs {
    /// MRT table dump to convert
    pub mrt: PathBuf,

    /// Output MMDB path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Existing MMDB to source ASN -> organization descriptions from
    #[arg(long)]
    pub reference_mmdb: Option<PathBuf>,

    /// Delimited (CSV/TSV) file of ASN -> organization descriptions
    #[arg(long)]
    pub asn_file: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub fn run(args: BuildArgs) -> CliResult<()> {
    let asn_start = Instant::now();
    let progress = ProgressReporter::new("Making ASN table for description lookup", args.quiet);
    let mut asn_table = AsnTable::new();
    if let Some(reference) = &args.reference_mmdb {
        let reader = Reader::open(reference)?;
        asn_table.merge(AsnTable::from_reference_mmdb(&reader)?);
    }
    if let Some(asn_file) = &args.asn_file {
        asn_table.merge(AsnTable::from_delimited_file(asn_file)?);
    }
    let asn_stats = StageStats {
        count: asn_table.len() as u64,
        duration: asn_start.elapsed(),
    };
    progress.finish_with_message(format!("{} ASN descriptions loaded", asn_table.len()));

    let load_start = Instant::now();
    let progress = ProgressReporter::new("Loading mrt data into dictionary", args.quiet);
    let file = std::fs::File::open(&args.mrt)?;
    let routes = mrt::read_rib_entries(&mut std::io::BufReader::new(file))?;
    let load_stats = StageStats {
        count: routes.len() as u64,
        duration: load_start.elapsed(),
    };
    progress.finish_with_message(format!("{} rib entries loaded", routes.len()));

    let convert_start = Instant::now();
    let progress = ProgressReporter::new("Converting mrt into mmdb", args.quiet);
    let (records, missing_asns) = merge::join(&routes, &asn_table);
    let mut writer = Writer::new(WriterOptions::default());
    for record in &records {
        writer.insert(&record.prefix, record.data.clone())?;
    }
    let convert_stats = StageStats {
        count: records.len() as u64,
        duration: convert_start.elapsed(),
    };
    progress.finish_with_message(format!("{} prefixes converted", records.len()));

    writer.write_to_path(&args.output)?;

    let metrics = BuildMetrics {
        asn_table: asn_stats,
        mrt_load: load_stats,
        convert: convert_stats,
        missing_prefixes: missing_asns.len() as u64,
        missing_asns: missing_asns.len() as u64,
        lastrun_timestamp: current_unix_timestamp(),
        mrt_file_epoch: file_epoch(&args.mrt),
        reference_mmdb_epoch: args.reference_mmdb.as_deref().map(file_epoch).unwrap_or(0),
    };
    print!("{}", mrt2mmdb::metrics::render(&metrics));
    println!(
        "Prefixes without description                            : {} prefixes",
        missing_asns.len()
    );

    Ok(())
}

fn current_unix_timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn file_epoch(path: &std::path::Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(chrono::DateTime::<chrono::Utc>::from)
        .map(|t| t.timestamp().max(0) as u64)
        .unwrap_or(0)
}
