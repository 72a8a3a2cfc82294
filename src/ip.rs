//! IP prefix helpers bridging `ipnet`'s typed networks and the tree's bit
//! vectors (spec §3, "IPv4-in-IPv6 tree semantics").

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;

use crate::error::{MmdbError, MmdbResult};

/// Number of leading bits an IPv4 address is embedded behind inside an IPv6
/// tree: 80 zero bits followed by 16 one-bits, i.e. the `::ffff:0:0/96`
/// convention every MMDB reader assumes (spec §3, §4.B, §4.C).
pub const IPV4_IN_IPV6_PREFIX_BITS: usize = 96;

/// Parses a CIDR string (`"1.2.3.0/24"`, `"2001:db8::/32"`) into an [`IpNet`].
pub fn parse_prefix(s: &str) -> MmdbResult<IpNet> {
    s.parse()
        .map_err(|_| MmdbError::UnsupportedPrefix(format!("cannot parse prefix \"{s}\"")))
}

/// Converts a network into the tree's bit representation (MSB first,
/// truncated to the network's prefix length), embedding IPv4 networks into
/// the `::ffff:0:0/96` subtree when the database is IPv6.
pub fn prefix_bits(network: &IpNet, ip_version: u16) -> MmdbResult<Vec<bool>> {
    match (network, ip_version) {
        (IpNet::V4(n), 4) => Ok(bits_from_bytes(&n.network().octets(), n.prefix_len() as usize)),
        (IpNet::V4(n), 6) => {
            let mut bits = ffff_prefix_bits();
            bits.extend(bits_from_bytes(&n.network().octets(), n.prefix_len() as usize));
            Ok(bits)
        }
        (IpNet::V6(n), 6) => Ok(bits_from_bytes(&n.network().octets(), n.prefix_len() as usize)),
        (IpNet::V6(_), 4) => Err(MmdbError::UnsupportedPrefix(
            "IPv6 prefix cannot be stored in an ip_version=4 database".into(),
        )),
    }
}

/// Full-width bit vector (32 or 128 bits, no truncation) for a single address
/// lookup, with the same IPv4-in-IPv6 embedding `prefix_bits` applies.
///
/// A literal IPv4-mapped IPv6 address (`::ffff:a.b.c.d`) already carries this
/// exact 96-bit prefix in its own octets, so it converges on the same 128-bit
/// path as the embedded form of `a.b.c.d` without any special-casing here.
pub fn address_bits(addr: IpAddr, ip_version: u16) -> MmdbResult<Vec<bool>> {
    match (addr, ip_version) {
        (IpAddr::V4(a), 4) => Ok(bits_from_bytes(&a.octets(), 32)),
        (IpAddr::V4(a), 6) => Ok(ipv4_in_ipv6_bits(a)),
        (IpAddr::V6(a), 6) => Ok(bits_from_bytes(&a.octets(), 128)),
        (IpAddr::V6(_), 4) => Err(MmdbError::UnsupportedPrefix(
            "IPv6 address cannot be looked up in an ip_version=4 database".into(),
        )),
    }
}

/// Bits for an IPv4 address embedded at `::ffff:0:0/96`.
pub fn ipv4_in_ipv6_bits(addr: Ipv4Addr) -> Vec<bool> {
    let mut bits = ffff_prefix_bits();
    bits.extend(bits_from_bytes(&addr.octets(), 32));
    bits
}

/// `::ffff:0:0/96` expressed as an [`Ipv6Addr`], the IPv4 subtree's root
/// address.
pub fn ipv4_root_address() -> Ipv6Addr {
    Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0, 0)
}

/// The 96 leading bits of the `::ffff:0:0/96` prefix: 80 zero bits, then the
/// 16-bit `0xffff` marker that distinguishes it from the plain `::/96`
/// (unspecified-address) subtree.
fn ffff_prefix_bits() -> Vec<bool> {
    let mut bits = vec![false; 80];
    bits.extend(bits_from_bytes(&0xffffu16.to_be_bytes(), 16));
    bits
}

fn bits_from_bytes(bytes: &[u8], len: usize) -> Vec<bool> {
    (0..len)
        .map(|i| {
            let byte = bytes[i / 8];
            (byte >> (7 - (i % 8))) & 1 == 1
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_bits_match_octets() {
        let net: IpNet = "1.2.3.0/24".parse().unwrap();
        let bits = prefix_bits(&net, 4).unwrap();
        assert_eq!(bits.len(), 24);
        assert_eq!(bits[0], false); // 1 = 0b00000001, MSB is 0
        assert_eq!(bits[7], true);
    }

    #[test]
    fn ipv4_embeds_behind_ffff_96_bit_prefix_for_ipv6_tree() {
        let net: IpNet = "1.2.3.0/24".parse().unwrap();
        let bits = prefix_bits(&net, 6).unwrap();
        assert_eq!(bits.len(), 96 + 24);
        assert!(bits[..80].iter().all(|b| !b));
        assert!(bits[80..96].iter().all(|b| *b));
    }

    #[test]
    fn ipv6_prefix_rejected_in_ipv4_database() {
        let net: IpNet = "2001:db8::/32".parse().unwrap();
        assert!(prefix_bits(&net, 4).is_err());
    }

    #[test]
    fn single_address_lookup_bits_are_full_width() {
        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(address_bits(addr, 4).unwrap().len(), 32);
        assert_eq!(address_bits(addr, 6).unwrap().len(), 128);
    }

    #[test]
    fn ipv4_mapped_literal_matches_embedded_ipv4_bits() {
        let embedded = ipv4_in_ipv6_bits("10.1.2.3".parse().unwrap());
        let literal: IpAddr = "::ffff:10.1.2.3".parse().unwrap();
        assert_eq!(address_bits(literal, 6).unwrap(), embedded);
    }

    #[test]
    fn ipv4_root_address_is_ffff_not_unspecified() {
        assert_eq!(ipv4_root_address(), "::ffff:0:0".parse::<Ipv6Addr>().unwrap());
        assert_ne!(ipv4_root_address(), Ipv6Addr::UNSPECIFIED);
    }
}
