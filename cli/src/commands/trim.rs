use std::path::PathBuf;

use clap::Args;
use mrt2mmdb::trim;

use crate::error::CliResult;

/// Rewrites an existing MMDB's data section in place, dropping named keys.
///
/// Grounded on spec.md §4.D; output lands alongside the input with the
/// literal `.trim` suffix (spec.md §6).
#[derive(Args)]
pub struct TrimArgs {
    /// MMDB file to trim
    pub mmdb: PathBuf,

    /// Dotted key path to drop from every record (repeatable)
    #[arg(short, long = "drop-key")]
    pub drop_keys: Vec<String>,
}

pub fn run(args: TrimArgs) -> CliResult<()> {
    let out_path = trim::trim(&args.mmdb, &args.drop_keys)?;
    println!("{}", out_path.display());
    Ok(())
}
