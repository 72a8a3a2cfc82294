use std::fmt::Display;
use thiserror::Error;

use log::debug;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    UnexpectedInput(String),
    #[error(transparent)]
    Mmdb(#[from] mrt2mmdb::MmdbError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid IP address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("invalid ASN: {0}")]
    AsnParse(#[from] std::num::ParseIntError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn into_human_message(self, prefix: impl Display) -> String {
        debug!("top level error was returned: {self:#?}");
        format!("{prefix}: {self}")
    }
}

pub type CliResult<T> = Result<T, CliError>;
