//! Address parsing and derivation helpers.

use std::net::{Ipv4Addr, Ipv6Addr};

/// Error type for address parsing.
#[derive(Debug, thiserror::Error)]
pub enum AddrError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid prefix length: {0}")]
    InvalidPrefix(String),

    #[error("invalid MAC address: {0}")]
    InvalidMac(String),
}

pub type Result<T> = std::result::Result<T, AddrError>;

/// Parse an IPv4 address with prefix length (CIDR notation).
///
/// A bare address is treated as a /32.
pub fn parse_ipv4_prefix(s: &str) -> Result<(Ipv4Addr, u8)> {
    let (addr_str, prefix) = match s.split_once('/') {
        Some((addr_str, prefix_str)) => {
            let prefix: u8 = prefix_str
                .parse()
                .map_err(|_| AddrError::InvalidPrefix(prefix_str.to_string()))?;
            if prefix > 32 {
                return Err(AddrError::InvalidPrefix(format!(
                    "{} exceeds maximum 32 for IPv4",
                    prefix
                )));
            }
            (addr_str, prefix)
        }
        None => (s, 32),
    };

    let addr = addr_str
        .parse()
        .map_err(|_| AddrError::InvalidAddress(addr_str.to_string()))?;
    Ok((addr, prefix))
}

/// Convert a prefix length to a dotted netmask. Lengths above 32 saturate.
pub fn netmask_from_prefix(prefix_len: u8) -> Ipv4Addr {
    match prefix_len {
        0 => Ipv4Addr::UNSPECIFIED,
        len if len >= 32 => Ipv4Addr::BROADCAST,
        len => Ipv4Addr::from(!0u32 << (32 - len)),
    }
}

/// Count the leading one bits of a netmask.
pub fn prefix_from_netmask(netmask: Ipv4Addr) -> u8 {
    u32::from(netmask).leading_ones() as u8
}

/// Derive the `fe80::/64` link-local address for a 48-bit MAC.
///
/// Uses the modified EUI-64 interface identifier: `ff:fe` is inserted in
/// the middle of the MAC and the universal/local bit is flipped.
pub fn link_local_from_mac(mac: [u8; 6]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets[0] = 0xfe;
    octets[1] = 0x80;
    octets[8] = mac[0] ^ 0x02;
    octets[9] = mac[1];
    octets[10] = mac[2];
    octets[11] = 0xff;
    octets[12] = 0xfe;
    octets[13] = mac[3];
    octets[14] = mac[4];
    octets[15] = mac[5];
    Ipv6Addr::from(octets)
}

/// Build a `fe80::/64` link-local address from a raw 64-bit interface id.
pub fn link_local_from_id(interface_id: u64) -> Ipv6Addr {
    Ipv6Addr::from((0xfe80u128 << 112) | u128::from(interface_id))
}

/// Parse a MAC address from string.
pub fn parse_mac(s: &str) -> Result<[u8; 6]> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return Err(AddrError::InvalidMac(s.to_string()));
    }

    let mut mac = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(part, 16).map_err(|_| AddrError::InvalidMac(s.to_string()))?;
    }

    Ok(mac)
}

/// Format a MAC address.
pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_prefix() {
        let (addr, prefix) = parse_ipv4_prefix("10.0.0.5/24").unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(prefix, 24);

        let (addr, prefix) = parse_ipv4_prefix("10.0.0.5").unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(prefix, 32);
    }

    #[test]
    fn test_parse_ipv4_prefix_rejects() {
        assert!(matches!(
            parse_ipv4_prefix("10.0.0.5/33"),
            Err(AddrError::InvalidPrefix(_))
        ));
        assert!(matches!(
            parse_ipv4_prefix("fe80::1/64"),
            Err(AddrError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_netmask_roundtrip() {
        assert_eq!(netmask_from_prefix(24), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(netmask_from_prefix(0), Ipv4Addr::UNSPECIFIED);
        assert_eq!(netmask_from_prefix(32), Ipv4Addr::BROADCAST);
        assert_eq!(netmask_from_prefix(20), Ipv4Addr::new(255, 255, 240, 0));
        assert_eq!(prefix_from_netmask(Ipv4Addr::new(255, 255, 240, 0)), 20);
    }

    #[test]
    fn test_link_local_from_mac() {
        let addr = link_local_from_mac([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        assert_eq!(addr.to_string(), "fe80::5054:ff:fe12:3456");
    }

    #[test]
    fn test_link_local_from_id() {
        assert_eq!(link_local_from_id(1).to_string(), "fe80::1");
    }

    #[test]
    fn test_parse_mac() {
        let mac = parse_mac("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(mac, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert!(parse_mac("aa:bb:cc").is_err());
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(
            format_mac(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
            "aa:bb:cc:dd:ee:ff"
        );
    }
}
