use std::net::IpAddr;
use std::path::PathBuf;

use clap::Args;
use mrt2mmdb::{Reader, Value};

use crate::error::{CliError, CliResult};

/// Looks up a description by IP address or by ASN (grounded on
/// `original_source/mrt2mmdb/lookup.py`'s `lookup`/`lookup_asn`).
#[derive(Args)]
pub struct LookupArgs {
    /// MMDB file to query
    pub mmdb: PathBuf,

    /// IP address to look up
    #[arg(long, conflicts_with = "asn")]
    pub ip: Option<String>,

    /// ASN to look up (scans every record; the table has no reverse index)
    #[arg(long, conflicts_with = "ip")]
    pub asn: Option<String>,

    /// Print the result as JSON instead of Rust debug formatting
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: LookupArgs) -> CliResult<()> {
    let reader = Reader::open(&args.mmdb)?;

    if let Some(ip) = &args.ip {
        let addr: IpAddr = ip.parse().map_err(CliError::AddrParse)?;
        print_result(reader.lookup(addr)?.map(|r| r.value), args.json)?;
        return Ok(());
    }

    if let Some(asn) = &args.asn {
        let asn: u64 = asn.parse().map_err(CliError::AsnParse)?;
        let mut found = None;
        for leaf in reader.iter() {
            let leaf = leaf?;
            if let Some(map) = leaf.value.as_map() {
                if map.get("autonomous_system_number").and_then(|v| v.as_u64()) == Some(asn) {
                    found = Some(leaf.value);
                }
            }
        }
        print_result(found, args.json)?;
        return Ok(());
    }

    Err(CliError::UnexpectedInput(
        "one of --ip or --asn is required".to_string(),
    ))
}

fn print_result(value: Option<Value>, json: bool) -> CliResult<()> {
    match value {
        Some(value) if json => println!("{}", serde_json::to_string_pretty(&to_json(&value))?),
        Some(value) => println!("{value:#?}"),
        None => println!("null"),
    }
    Ok(())
}

fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Map(m) => Json::Object(m.iter().map(|(k, v)| (k.clone(), to_json(v))).collect()),
        Value::Array(a) => Json::Array(a.iter().map(to_json).collect()),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(hex_encode(b)),
        Value::Uint16(n) => Json::from(*n),
        Value::Uint32(n) => Json::from(*n),
        Value::Uint64(n) => Json::from(*n),
        Value::Uint128(n) => Json::String(n.to_string()),
        Value::Int32(n) => Json::from(*n),
        Value::Double(n) => Json::from(*n),
        Value::Float(n) => Json::from(*n),
        Value::Boolean(b) => Json::from(*b),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
