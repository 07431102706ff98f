//! Core types shared by the allocator, registrar and monitor

use std::fmt;
use std::net::Ipv4Addr;

/// MAC address as seen in a DHCPDISCOVER line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Parse MAC from colon-separated string (e.g., "00:11:22:33:44:55")
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return None;
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return None;
            }
            bytes[i] = u8::from_str_radix(part, 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// A row of the `subnets` table matched to an interface's network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetRecord {
    /// Logical network name passed as `network=` when adding interfaces
    pub name: String,
    /// Gateway address; never handed out
    pub gateway: Option<Ipv4Addr>,
    /// Whether nodes on this subnet may be discovered
    pub pxe: bool,
}

/// A row of the `appliances` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appliance {
    pub id: i64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_and_display() {
        let mac = MacAddress::parse("52:54:00:AB:cd:0f").unwrap();
        assert_eq!(mac.0, [0x52, 0x54, 0x00, 0xab, 0xcd, 0x0f]);
        assert_eq!(mac.to_string(), "52:54:00:ab:cd:0f");
    }

    #[test]
    fn test_mac_parse_rejects_malformed() {
        assert!(MacAddress::parse("52:54:00:ab:cd").is_none());
        assert!(MacAddress::parse("52:54:00:ab:cd:0g").is_none());
        assert!(MacAddress::parse("5:54:00:ab:cd:0f").is_none());
        assert!(MacAddress::parse("").is_none());
    }
}
