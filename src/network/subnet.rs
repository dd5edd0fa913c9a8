//! CIDR parsing and subnet arithmetic

use anyhow::{Context, Result, anyhow};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// A parsed `A.B.C.D/N` target range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    network: Ipv4Network,
}

impl Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        let network =
            Ipv4Network::new(addr, prefix).context("prefix length out of range (0..=32)")?;
        Ok(Self { network })
    }

    pub fn prefix(&self) -> u8 {
        self.network.prefix()
    }

    /// Network address (host bits zeroed).
    pub fn network(&self) -> Ipv4Addr {
        self.network.network()
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        self.network.broadcast()
    }

    /// Number of usable hosts: `2^(32-N) - 2`, clamped to 0 for /31 and /32.
    pub fn host_count(&self) -> u32 {
        let prefix = self.network.prefix();
        if prefix >= 31 {
            return 0;
        }
        (1u32 << (32 - prefix)) - 2
    }

    /// First usable host address, when one exists.
    pub fn first_host(&self) -> Option<Ipv4Addr> {
        if self.host_count() == 0 {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.network.network()) + 1))
    }

    /// Last usable host address, when one exists.
    pub fn last_host(&self) -> Option<Ipv4Addr> {
        if self.host_count() == 0 {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.network.broadcast()) - 1))
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.network.contains(ip)
    }

    /// Network or broadcast address of this range.
    pub fn is_special_address(&self, ip: Ipv4Addr) -> bool {
        ip == self.network.network() || ip == self.network.broadcast()
    }
}

impl FromStr for Cidr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr_part, prefix_part) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| anyhow!("expected A.B.C.D/N, got '{}'", s))?;
        let addr: Ipv4Addr = addr_part
            .parse()
            .with_context(|| format!("invalid IPv4 address '{}'", addr_part))?;
        let prefix: u8 = prefix_part
            .parse()
            .with_context(|| format!("invalid prefix '{}'", prefix_part))?;
        Self::new(addr, prefix)
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network.network(), self.network.prefix())
    }
}

impl TryFrom<String> for Cidr {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse().map_err(|e: anyhow::Error| e.to_string())
    }
}

impl From<Cidr> for String {
    fn from(cidr: Cidr) -> String {
        cidr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_computes_bounds() {
        let cidr: Cidr = "192.168.1.37/24".parse().unwrap();
        assert_eq!(cidr.network(), Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(cidr.broadcast(), Ipv4Addr::new(192, 168, 1, 255));
        assert_eq!(cidr.first_host(), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(cidr.last_host(), Some(Ipv4Addr::new(192, 168, 1, 254)));
        assert_eq!(cidr.host_count(), 254);
    }

    #[test]
    fn host_count_clamps_for_31_and_32() {
        let p31: Cidr = "10.0.0.0/31".parse().unwrap();
        let p32: Cidr = "10.0.0.1/32".parse().unwrap();
        assert_eq!(p31.host_count(), 0);
        assert_eq!(p32.host_count(), 0);
        assert_eq!(p31.first_host(), None);
        assert_eq!(p32.last_host(), None);
    }

    #[test]
    fn network_has_low_bits_zero() {
        for raw in ["10.1.2.3/8", "172.16.5.9/12", "192.168.1.200/28"] {
            let cidr: Cidr = raw.parse().unwrap();
            let prefix = cidr.prefix();
            let host_bits = 32 - u32::from(prefix);
            assert_eq!(u32::from(cidr.network()) & ((1u32 << host_bits) - 1), 0);
        }
    }

    #[test]
    fn first_plus_count_is_last() {
        for raw in ["192.168.0.0/24", "10.0.0.0/16", "10.0.0.0/30"] {
            let cidr: Cidr = raw.parse().unwrap();
            let first = u32::from(cidr.first_host().unwrap());
            let last = u32::from(cidr.last_host().unwrap());
            assert_eq!(first + cidr.host_count() - 1, last);
        }
    }

    #[test]
    fn rejects_malformed_ranges() {
        assert!("192.168.1.0".parse::<Cidr>().is_err());
        assert!("192.168.1.0/33".parse::<Cidr>().is_err());
        assert!("999.168.1.0/24".parse::<Cidr>().is_err());
        assert!("192.168.1.0/x".parse::<Cidr>().is_err());
    }

    #[test]
    fn special_addresses() {
        let cidr: Cidr = "192.168.1.0/24".parse().unwrap();
        assert!(cidr.is_special_address(Ipv4Addr::new(192, 168, 1, 0)));
        assert!(cidr.is_special_address(Ipv4Addr::new(192, 168, 1, 255)));
        assert!(!cidr.is_special_address(Ipv4Addr::new(192, 168, 1, 1)));
    }
}
