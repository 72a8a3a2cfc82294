//! Crate-wide error type.

use thiserror::Error;

/// Errors produced while encoding, writing, reading, or trimming MMDB data.
#[derive(Debug, Error)]
pub enum MmdbError {
    #[error("invalid database: {0}")]
    InvalidDatabase(String),

    #[error("invalid pointer: {0}")]
    InvalidPointer(String),

    #[error("unsupported prefix: {0}")]
    UnsupportedPrefix(String),

    #[error("value too large to encode: {0}")]
    EncodeOverflow(String),

    #[error("no ASN description found for AS{0}")]
    MissingRecord(u32),

    #[error("source file not found: {0}")]
    SourceUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed delimited input: {0}")]
    DelimitedParse(#[from] csv::Error),
}

pub type MmdbResult<T> = Result<T, MmdbError>;
