//! Network interface enumeration and primary selection

use anyhow::{Result, anyhow};
use pnet::datalink;
use std::net::{IpAddr, Ipv4Addr};

use crate::models::{Ipv6Info, Ipv6Kind};
use crate::network::ipv6::parse_ipv6;
use crate::network::subnet::Cidr;

/// A usable local interface with its addresses.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub ipv4: Option<Ipv4Addr>,
    pub cidr: Option<Cidr>,
    pub ipv6: Vec<Ipv6Info>,
    pub mac: Option<String>,
}

impl InterfaceInfo {
    /// True when the interface has an RFC1918 IPv4 assignment.
    pub fn is_private_lan(&self) -> bool {
        self.ipv4.is_some_and(is_rfc1918)
    }
}

fn is_rfc1918(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 10
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
}

/// Enumerate non-loopback interfaces carrying at least one address.
///
/// IPv6 multicast and loopback addresses are excluded from the per-interface
/// list; link-local entries keep the interface name as their scope.
pub fn list_interfaces() -> Vec<InterfaceInfo> {
    let mut result = Vec::new();

    for iface in datalink::interfaces() {
        if iface.is_loopback() {
            continue;
        }

        let mut info = InterfaceInfo {
            name: iface.name.clone(),
            ipv4: None,
            cidr: None,
            ipv6: Vec::new(),
            mac: iface.mac.map(|m| m.to_string().to_uppercase()),
        };

        for ip_network in &iface.ips {
            match ip_network.ip() {
                IpAddr::V4(v4) => {
                    if v4.is_unspecified() || ip_network.prefix() == 0 {
                        continue;
                    }
                    // Skip 169.254.x.x auto-configuration addresses.
                    if v4.octets()[0] == 169 && v4.octets()[1] == 254 {
                        continue;
                    }
                    if info.ipv4.is_none() {
                        info.ipv4 = Some(v4);
                        info.cidr = Cidr::new(v4, ip_network.prefix()).ok();
                    }
                }
                IpAddr::V6(v6) => {
                    if v6.is_loopback() {
                        continue;
                    }
                    let Some(mut parsed) = parse_ipv6(&v6.to_string()) else {
                        continue;
                    };
                    if parsed.kind == Ipv6Kind::Multicast {
                        continue;
                    }
                    if parsed.kind == Ipv6Kind::LinkLocal && parsed.scope.is_none() {
                        parsed.scope = Some(iface.name.clone());
                    }
                    if !info.ipv6.iter().any(|existing| existing.addr == parsed.addr) {
                        info.ipv6.push(parsed);
                    }
                }
            }
        }

        if info.ipv4.is_some() || !info.ipv6.is_empty() {
            result.push(info);
        }
    }

    result
}

/// Select the primary interface: prefer an RFC1918 IPv4 assignment, ties
/// broken by enumeration order.
pub fn primary_interface() -> Result<InterfaceInfo> {
    let mut candidates = list_interfaces();
    if candidates.is_empty() {
        return Err(anyhow!(
            "No usable network interface found.\n\
             Ensure you have an active network connection."
        ));
    }
    // Stable sort keeps enumeration order within each tier.
    candidates.sort_by_key(|iface| if iface.is_private_lan() { 0u8 } else { 1u8 });
    Ok(candidates.remove(0))
}

/// Find an interface by exact name.
pub fn find_interface(name: &str) -> Result<InterfaceInfo> {
    list_interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| anyhow!("Interface '{}' not found or has no usable address", name))
}
