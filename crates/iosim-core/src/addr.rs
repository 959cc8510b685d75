//! IPv4 addressing helpers
//!
//! Masks are assumed to be contiguous (leading one-bits). Discontiguous masks
//! are accepted but their prefix length is not meaningful.

use std::net::Ipv4Addr;

use crate::error::AddressError;

/// Parse a dotted-quad IPv4 address
pub fn parse_ipv4(s: &str) -> Result<Ipv4Addr, AddressError> {
    s.trim()
        .parse()
        .map_err(|_| AddressError::InvalidAddress(s.to_string()))
}

/// Prefix length of a contiguous mask
///
/// Whole `255` octets count eight bits each; the first octet that is not
/// all-ones contributes its set bits and ends the count.
pub fn prefix_len(mask: Ipv4Addr) -> u8 {
    let mut length = 0u8;
    for octet in mask.octets() {
        if octet == 0xFF {
            length += 8;
        } else {
            length += octet.count_ones() as u8;
            break;
        }
    }
    length
}

/// Build the contiguous mask for a prefix length
pub fn mask_from_len(len: u8) -> Result<Ipv4Addr, AddressError> {
    if len > 32 {
        return Err(AddressError::InvalidPrefixLength(len));
    }
    Ok(Ipv4Addr::from(mask_bits(len)))
}

fn mask_bits(len: u8) -> u32 {
    match len {
        0 => 0,
        len => u32::MAX << (32 - u32::from(len.min(32))),
    }
}

/// Apply a mask to an address
pub fn apply_mask(addr: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(addr) & u32::from(mask))
}

/// The mask bits of a single octet position for a prefix length
///
/// `octet_index` is 0-based from the most significant octet.
pub fn octet_mask(len: u8, octet_index: usize) -> u8 {
    let start = (octet_index * 8) as u32;
    let len = u32::from(len);
    if len >= start + 8 {
        0xFF
    } else if len <= start {
        0
    } else {
        0xFFu8 << (8 - (len - start))
    }
}

/// Routing-table key for a prefix: `"<masked prefix>/<len>"`
///
/// Keys compare as strings, so `"10.0.0.0/8"` sorts before `"9.0.0.0/8"`.
pub fn route_key(prefix: Ipv4Addr, len: u8) -> String {
    let len = len.min(32);
    let network = Ipv4Addr::from(u32::from(prefix) & mask_bits(len));
    format!("{}/{}", network, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        parse_ipv4(s).unwrap()
    }

    #[test]
    fn test_prefix_len() {
        assert_eq!(prefix_len(ip("255.255.255.255")), 32);
        assert_eq!(prefix_len(ip("255.255.255.0")), 24);
        assert_eq!(prefix_len(ip("255.255.0.0")), 16);
        assert_eq!(prefix_len(ip("255.0.0.0")), 8);
        assert_eq!(prefix_len(ip("255.255.240.0")), 20);
        assert_eq!(prefix_len(ip("0.0.0.0")), 0);
    }

    #[test]
    fn test_prefix_len_stops_at_first_partial_octet() {
        // Bits after the first non-255 octet are ignored
        assert_eq!(prefix_len(ip("255.128.255.0")), 9);
    }

    #[test]
    fn test_mask_from_len() {
        assert_eq!(mask_from_len(0).unwrap(), ip("0.0.0.0"));
        assert_eq!(mask_from_len(20).unwrap(), ip("255.255.240.0"));
        assert_eq!(mask_from_len(32).unwrap(), ip("255.255.255.255"));
        assert!(mask_from_len(33).is_err());
    }

    #[test]
    fn test_octet_mask() {
        assert_eq!(octet_mask(20, 0), 0xFF);
        assert_eq!(octet_mask(20, 1), 0xFF);
        assert_eq!(octet_mask(20, 2), 0xF0);
        assert_eq!(octet_mask(20, 3), 0x00);
        assert_eq!(octet_mask(0, 0), 0x00);
        assert_eq!(octet_mask(32, 3), 0xFF);
    }

    #[test]
    fn test_route_key_masks_prefix() {
        assert_eq!(route_key(ip("10.1.2.3"), 8), "10.0.0.0/8");
        assert_eq!(route_key(ip("192.168.1.77"), 24), "192.168.1.0/24");
        assert_eq!(route_key(ip("8.8.8.8"), 0), "0.0.0.0/0");
        assert_eq!(route_key(ip("8.8.8.8"), 32), "8.8.8.8/32");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_ipv4("10.0.0").is_err());
        assert!(parse_ipv4("256.1.1.1").is_err());
        assert_eq!(parse_ipv4(" 10.0.0.1 ").unwrap(), ip("10.0.0.1"));
    }
}
