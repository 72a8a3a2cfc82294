//! MRT (RFC 6396) TABLE_DUMP_V2 reader, extracting just enough of each RIB
//! entry's BGP path attributes to recover its AS path.
//!
//! The common header is a fixed layout, so it's parsed with `binrw` the same
//! way the teacher parses its own fixed record headers; the variable-length
//! RIB/path-attribute payloads that follow are walked by hand with
//! `byteorder`, matching the teacher's mix of derive-based and manual
//! parsing for variable-length structures.

use std::io::{Read, Seek, SeekFrom};

use binrw::BinRead;
use byteorder::{BigEndian, ReadBytesExt};
use ipnet::IpNet;
use log::{trace, warn};

use crate::error::{MmdbError, MmdbResult};

const MRT_TYPE_TABLE_DUMP_V2: u16 = 13;
const SUBTYPE_PEER_INDEX_TABLE: u16 = 1;
const SUBTYPE_RIB_IPV4_UNICAST: u16 = 2;
const SUBTYPE_RIB_IPV6_UNICAST: u16 = 4;

const BGP_ATTR_FLAG_EXTENDED_LENGTH: u8 = 0x10;
const BGP_ATTR_TYPE_AS_PATH: u8 = 2;
const BGP_ATTR_TYPE_AS4_PATH: u8 = 17;

const AS_SET: u8 = 1;

#[derive(BinRead, Debug)]
#[br(big)]
struct CommonHeader {
    _timestamp: u32,
    mrt_type: u16,
    subtype: u16,
    length: u32,
}

/// One RIB entry's prefix and the AS path announced for it.
#[derive(Debug, Clone, PartialEq)]
pub struct RibEntry {
    pub prefix: IpNet,
    pub as_path: Vec<u32>,
    /// The AS path rendered as text, with AS_SET segments brace-grouped
    /// (`"65000 {1,2,3}"`) exactly as the destination-ASN normalization step
    /// of spec §4.E expects to find them (it strips `{`, `}`, `,` off the
    /// trailing segment before using it as a lookup key).
    pub as_path_text: String,
}

impl RibEntry {
    /// The origin AS: the last hop in the path, i.e. the network that
    /// injected the route.
    pub fn origin_as(&self) -> Option<u32> {
        self.as_path.last().copied()
    }
}

/// Reads every RIB entry with a decodable AS path out of an MRT
/// TABLE_DUMP_V2 stream. Entries with no AS_PATH/AS4_PATH attribute (rare,
/// but allowed by the format) are skipped with a warning rather than
/// failing the whole read.
pub fn read_rib_entries<R: Read + Seek>(mut reader: R) -> MmdbResult<Vec<RibEntry>> {
    let mut entries = Vec::new();
    loop {
        let header = match CommonHeader::read(&mut reader) {
            Ok(h) => h,
            Err(binrw::Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(MmdbError::InvalidDatabase(format!("malformed MRT header: {e}"))),
        };

        let body_start = reader.stream_position()?;
        if header.mrt_type != MRT_TYPE_TABLE_DUMP_V2 {
            trace!("skipping MRT record of type {}", header.mrt_type);
            reader.seek(SeekFrom::Start(body_start + header.length as u64))?;
            continue;
        }

        match header.subtype {
            SUBTYPE_RIB_IPV4_UNICAST | SUBTYPE_RIB_IPV6_UNICAST => {
                let is_v6 = header.subtype == SUBTYPE_RIB_IPV6_UNICAST;
                let mut body = read_exact_buf(&mut reader, header.length as usize)?;
                entries.extend(parse_rib_subtype(&mut body, is_v6)?);
            }
            SUBTYPE_PEER_INDEX_TABLE => {
                reader.seek(SeekFrom::Start(body_start + header.length as u64))?;
            }
            other => {
                trace!("skipping TABLE_DUMP_V2 subtype {other}");
                reader.seek(SeekFrom::Start(body_start + header.length as u64))?;
            }
        }
    }
    Ok(entries)
}

fn read_exact_buf<R: Read>(reader: &mut R, len: usize) -> MmdbResult<std::io::Cursor<Vec<u8>>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(std::io::Cursor::new(buf))
}

fn parse_rib_subtype(body: &mut std::io::Cursor<Vec<u8>>, is_v6: bool) -> MmdbResult<Vec<RibEntry>> {
    let _sequence_number = body.read_u32::<BigEndian>()?;
    let prefix_len = body.read_u8()?;
    let prefix_bytes_len = prefix_len.div_ceil(8) as usize;
    let mut prefix_bytes = vec![0u8; if is_v6 { 16 } else { 4 }];
    let mut read_bytes = vec![0u8; prefix_bytes_len];
    body.read_exact(&mut read_bytes)?;
    prefix_bytes[..prefix_bytes_len].copy_from_slice(&read_bytes);
    let prefix = build_prefix(&prefix_bytes, prefix_len, is_v6)?;

    let entry_count = body.read_u16::<BigEndian>()?;
    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let _peer_index = body.read_u16::<BigEndian>()?;
        let _originated_time = body.read_u32::<BigEndian>()?;
        let attr_len = body.read_u16::<BigEndian>()?;
        let mut attrs = vec![0u8; attr_len as usize];
        body.read_exact(&mut attrs)?;

        match parse_as_path(&attrs) {
            Ok(Some((as_path, as_path_text))) => entries.push(RibEntry {
                prefix,
                as_path,
                as_path_text,
            }),
            Ok(None) => warn!("RIB entry for {prefix} has no AS_PATH attribute, skipping"),
            Err(e) => warn!("failed to parse path attributes for {prefix}: {e}"),
        }
    }
    Ok(entries)
}

fn build_prefix(bytes: &[u8], prefix_len: u8, is_v6: bool) -> MmdbResult<IpNet> {
    if is_v6 {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(bytes);
        IpNet::new(std::net::Ipv6Addr::from(octets).into(), prefix_len)
            .map_err(|e| MmdbError::UnsupportedPrefix(e.to_string()))
    } else {
        let mut octets = [0u8; 4];
        octets.copy_from_slice(bytes);
        IpNet::new(std::net::Ipv4Addr::from(octets).into(), prefix_len)
            .map_err(|e| MmdbError::UnsupportedPrefix(e.to_string()))
    }
}

/// One AS_PATH segment: an ordered AS_SEQUENCE hop-by-hop run, or an
/// unordered AS_SET (the BGP aggregation construct rendered brace-grouped in
/// path text, e.g. `{1,2,3}`).
struct PathSegment {
    is_set: bool,
    asns: Vec<u32>,
}

/// Walks a RIB entry's BGP path attributes looking for AS4_PATH, falling
/// back to AS_PATH. ASNs are read as 4 bytes, matching modern MRT dumps
/// (which always carry 4-byte ASNs in TABLE_DUMP_V2). Returns the flattened
/// ASN list (for origin extraction) alongside the brace-grouped path text
/// (for display/merge), or `None` if neither attribute is present.
fn parse_as_path(attrs: &[u8]) -> MmdbResult<Option<(Vec<u32>, String)>> {
    let mut cursor = std::io::Cursor::new(attrs);
    let mut as_path = None;
    let mut as4_path = None;

    while (cursor.position() as usize) < attrs.len() {
        let flags = cursor.read_u8()?;
        let type_code = cursor.read_u8()?;
        let length = if flags & BGP_ATTR_FLAG_EXTENDED_LENGTH != 0 {
            cursor.read_u16::<BigEndian>()? as usize
        } else {
            cursor.read_u8()? as usize
        };
        let start = cursor.position() as usize;
        let end = start + length;
        let value = attrs
            .get(start..end)
            .ok_or_else(|| MmdbError::InvalidDatabase("path attribute length runs past the buffer".into()))?;
        cursor.set_position(end as u64);

        match type_code {
            BGP_ATTR_TYPE_AS_PATH => as_path = Some(parse_as_path_segments(value)?),
            BGP_ATTR_TYPE_AS4_PATH => as4_path = Some(parse_as_path_segments(value)?),
            _ => {}
        }
    }

    Ok(as4_path.or(as_path).map(|segments| {
        let asns = segments.iter().flat_map(|s| s.asns.iter().copied()).collect();
        let text = render_as_path(&segments);
        (asns, text)
    }))
}

/// Parses the segment list inside one AS_PATH/AS4_PATH attribute value.
fn parse_as_path_segments(value: &[u8]) -> MmdbResult<Vec<PathSegment>> {
    let mut cursor = std::io::Cursor::new(value);
    let mut segments = Vec::new();
    while (cursor.position() as usize) < value.len() {
        let seg_type = cursor.read_u8()?;
        let seg_len = cursor.read_u8()?;
        let mut asns = Vec::with_capacity(seg_len as usize);
        for _ in 0..seg_len {
            asns.push(cursor.read_u32::<BigEndian>()?);
        }
        segments.push(PathSegment {
            is_set: seg_type == AS_SET,
            asns,
        });
    }
    Ok(segments)
}

/// Renders segments as space-separated hops, with AS_SET segments wrapped in
/// `{...}` and comma-joined, matching the brace convention spec §4.E's
/// origin-ASN normalization strips off the trailing segment.
fn render_as_path(segments: &[PathSegment]) -> String {
    segments
        .iter()
        .map(|segment| {
            if segment.is_set {
                format!(
                    "{{{}}}",
                    segment.asns.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
                )
            } else {
                segment.asns.iter().map(u32::to_string).collect::<Vec<_>>().join(" ")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::{Cursor, Write};

    fn write_as_path_attr(out: &mut Vec<u8>, type_code: u8, asns: &[u32]) {
        write_as_path_attr_segment(out, type_code, 2, asns); // AS_SEQUENCE
    }

    fn write_as_path_attr_segment(out: &mut Vec<u8>, type_code: u8, seg_type: u8, asns: &[u32]) {
        let mut value = Vec::new();
        value.push(seg_type);
        value.push(asns.len() as u8);
        for asn in asns {
            value.write_u32::<BigEndian>(*asn).unwrap();
        }
        out.push(0x40); // flags: well-known, transitive
        out.push(type_code);
        out.push(value.len() as u8);
        out.extend(value);
    }

    #[test]
    fn parses_as4_path_over_as_path() {
        let mut attrs = Vec::new();
        write_as_path_attr(&mut attrs, BGP_ATTR_TYPE_AS_PATH, &[65000]);
        write_as_path_attr(&mut attrs, BGP_ATTR_TYPE_AS4_PATH, &[65000, 15169]);
        let (path, text) = parse_as_path(&attrs).unwrap().unwrap();
        assert_eq!(path, vec![65000, 15169]);
        assert_eq!(text, "65000 15169");
    }

    #[test]
    fn as_set_segment_renders_brace_grouped() {
        // One AS_PATH attribute whose value holds two segments: an
        // AS_SEQUENCE hop followed by an AS_SET.
        let mut value = Vec::new();
        value.push(2u8); // AS_SEQUENCE
        value.push(1u8);
        value.write_u32::<BigEndian>(65000).unwrap();
        value.push(AS_SET);
        value.push(3u8);
        for asn in [1u32, 2, 3] {
            value.write_u32::<BigEndian>(asn).unwrap();
        }
        let mut attrs = Vec::new();
        attrs.push(0x40); // flags: well-known, transitive
        attrs.push(BGP_ATTR_TYPE_AS_PATH);
        attrs.push(value.len() as u8);
        attrs.extend(value);

        let (path, text) = parse_as_path(&attrs).unwrap().unwrap();
        assert_eq!(path, vec![65000, 1, 2, 3]);
        assert_eq!(text, "65000 {1,2,3}");
    }

    #[test]
    fn origin_as_is_last_hop() {
        let entry = RibEntry {
            prefix: "8.8.8.0/24".parse().unwrap(),
            as_path: vec![65000, 15169],
            as_path_text: "65000 15169".to_string(),
        };
        assert_eq!(entry.origin_as(), Some(15169));
    }

    #[test]
    fn reads_ipv4_rib_entry_end_to_end() {
        let mut payload = Vec::new();
        payload.write_u32::<BigEndian>(0).unwrap(); // sequence number
        payload.push(24); // prefix length
        payload.extend_from_slice(&[8, 8, 8]); // 8.8.8.0/24
        payload.write_u16::<BigEndian>(1).unwrap(); // entry_count

        let mut attrs = Vec::new();
        write_as_path_attr(&mut attrs, BGP_ATTR_TYPE_AS_PATH, &[15169]);

        payload.write_u16::<BigEndian>(0).unwrap(); // peer_index
        payload.write_u32::<BigEndian>(0).unwrap(); // originated_time
        payload.write_u16::<BigEndian>(attrs.len() as u16).unwrap();
        payload.extend(attrs);

        let mut mrt = Vec::new();
        mrt.write_u32::<BigEndian>(0).unwrap(); // timestamp
        mrt.write_u16::<BigEndian>(MRT_TYPE_TABLE_DUMP_V2).unwrap();
        mrt.write_u16::<BigEndian>(SUBTYPE_RIB_IPV4_UNICAST).unwrap();
        mrt.write_u32::<BigEndian>(payload.len() as u32).unwrap();
        mrt.extend(payload);

        let entries = read_rib_entries(Cursor::new(mrt)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].prefix, "8.8.8.0/24".parse().unwrap());
        assert_eq!(entries[0].origin_as(), Some(15169));
    }
}
