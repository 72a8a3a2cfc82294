#![doc = include_str!("../README.md")]

pub mod enrich;
pub mod error;
pub mod ip;
pub mod metadata;
pub mod metrics;
pub mod tree;
pub mod trim;
pub mod value;

mod encoder;
mod reader;
mod writer;

pub use encoder::{decode_pointer, encode_pointer, Encoder};
pub use error::{MmdbError, MmdbResult};
pub use reader::{LeafRecord, LookupResult, Reader, RecordIter};
pub use value::Value;
pub use writer::{Writer, WriterOptions};
