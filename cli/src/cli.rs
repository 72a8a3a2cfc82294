use clap::{Parser, Subcommand};

use crate::commands;
use crate::error::CliResult;

#[derive(Parser)]
#[command(name = "mmdb")]
#[command(about = "Build and trim MaxMind-format IP databases from MRT table dumps")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build an MMDB file from an MRT table dump
    Build(commands::build::BuildArgs),

    /// Trim keys out of an existing MMDB's records in place
    Trim(commands::trim::TrimArgs),

    /// Look up a record by IP address or ASN
    Lookup(commands::lookup::LookupArgs),

    /// Compare an MMDB's ASN table against a delimited lookup file
    Diff(commands::diff::DiffArgs),
}

impl Cli {
    pub fn execute(self) -> CliResult<()> {
        match self.command {
            Commands::Build(args) => commands::build::run(args),
            Commands::Trim(args) => commands::trim::run(args),
            Commands::Lookup(args) => commands::lookup::run(args),
            Commands::Diff(args) => commands::diff::run(args),
        }
    }
}
