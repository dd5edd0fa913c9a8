//! Neighbour-table output parsers (ARP and NDP)
//!
//! Handles the platform flavours of the neighbour tools: `ip neigh` /
//! `arp -a` for IPv4 and `ip -6 neigh` / `ndp -an` for IPv6. Parsers are
//! total; unparseable lines yield nothing.

use std::net::Ipv4Addr;

use crate::models::{DiscoverySource, Observation};
use crate::network::ipv6::parse_ipv6;
use crate::network::mac::{is_broadcast_mac, normalize_mac};

/// Parse IPv4 neighbour-table output into observations.
///
/// A line contributes when it contains an IPv4 token followed by a MAC
/// token. Entries in `incomplete` state and the broadcast MAC are
/// discarded; abbreviated MAC octets are expanded.
pub fn parse_arp_table(output: &str) -> Vec<Observation> {
    let mut observations = Vec::new();

    for line in output.lines() {
        let lower = line.to_lowercase();
        if lower.contains("incomplete") {
            continue;
        }

        let mut ipv4: Option<Ipv4Addr> = None;
        let mut mac: Option<String> = None;

        for token in line.split_whitespace() {
            let token = token.trim_matches(|c| c == '(' || c == ')' || c == ',');
            if ipv4.is_none()
                && let Ok(addr) = token.parse::<Ipv4Addr>()
            {
                ipv4 = Some(addr);
                continue;
            }
            if ipv4.is_some()
                && mac.is_none()
                && looks_like_mac(token)
                && let Some(canonical) = normalize_mac(token)
            {
                mac = Some(canonical);
            }
        }

        let (Some(addr), Some(mac)) = (ipv4, mac) else {
            continue;
        };
        if is_broadcast_mac(&mac) {
            continue;
        }

        let mut obs = Observation::new(DiscoverySource::Arp);
        obs.ipv4 = Some(addr);
        obs.mac = Some(mac);
        observations.push(obs);
    }

    observations
}

/// Parse IPv6 neighbour-table output into observations.
///
/// Matches `<IPv6>[%zone] ... <MAC> ... <state>`. `FAILED` entries are
/// discarded; the zone identifier is recorded as the interface scope.
pub fn parse_ndp_table(output: &str) -> Vec<Observation> {
    let mut observations = Vec::new();

    for line in output.lines() {
        if line.split_whitespace().any(|t| t == "FAILED") {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let Some(first) = tokens.next() else {
            continue;
        };
        let Some(mut info) = parse_ipv6(first) else {
            continue;
        };

        let mut mac: Option<String> = None;
        let mut prev: Option<&str> = Some(first);
        for token in tokens {
            if mac.is_none()
                && looks_like_mac(token)
                && let Some(canonical) = normalize_mac(token)
            {
                mac = Some(canonical);
            }
            // `ip -6 neigh` names the interface after a `dev` keyword.
            if info.scope.is_none() && prev == Some("dev") {
                info.scope = Some(token.to_string());
            }
            prev = Some(token);
        }

        let Some(mac) = mac else {
            continue;
        };
        if is_broadcast_mac(&mac) {
            continue;
        }

        let mut obs = Observation::new(DiscoverySource::Ndp);
        obs.mac = Some(mac);
        obs.ipv6.push(info);
        observations.push(obs);
    }

    observations
}

/// Colon- or dash-separated six-part hex token. Bare 12-digit forms are not
/// accepted here: neighbour tables never print them and the check keeps
/// decimal-looking tokens out.
fn looks_like_mac(token: &str) -> bool {
    let sep = if token.contains(':') {
        ':'
    } else if token.contains('-') {
        '-'
    } else {
        return false;
    };
    let parts: Vec<&str> = token.split(sep).collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.len() <= 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Ipv6Kind;

    #[test]
    fn parses_linux_ip_neigh() {
        let output = "\
192.168.1.1 dev eth0 lladdr a4:2b:b0:c9:00:01 REACHABLE
192.168.1.23 dev eth0 lladdr 0:0:5e:0:1:f STALE
192.168.1.99 dev eth0  INCOMPLETE
";
        let obs = parse_arp_table(output);
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].ipv4, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(obs[0].mac.as_deref(), Some("A4:2B:B0:C9:00:01"));
        assert_eq!(obs[1].mac.as_deref(), Some("00:00:5E:00:01:0F"));
    }

    #[test]
    fn parses_bsd_arp_a() {
        let output = "\
? (192.168.1.1) at a4:2b:b0:c9:0:1 on en0 ifscope [ethernet]
? (192.168.1.255) at ff:ff:ff:ff:ff:ff on en0 ifscope [ethernet]
? (192.168.1.7) at (incomplete) on en0 ifscope [ethernet]
";
        let obs = parse_arp_table(output);
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].ipv4, Some(Ipv4Addr::new(192, 168, 1, 1)));
    }

    #[test]
    fn parses_windows_arp_a() {
        let output = "\
Interface: 192.168.1.100 --- 0x8
  Internet Address      Physical Address      Type
  192.168.1.1           a4-2b-b0-c9-00-01     dynamic
  192.168.1.255         ff-ff-ff-ff-ff-ff     static
";
        let obs = parse_arp_table(output);
        // The interface header has no MAC token; broadcast is dropped.
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].mac.as_deref(), Some("A4:2B:B0:C9:00:01"));
    }

    #[test]
    fn parses_ip6_neigh_and_drops_failed() {
        let output = "\
fe80::1 dev eth0 lladdr a4:2b:b0:c9:00:01 router REACHABLE
2001:db8::42 dev eth0 lladdr 11:22:33:44:55:66 STALE
fe80::dead dev eth0  FAILED
";
        let obs = parse_ndp_table(output);
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].ipv6[0].addr, "fe80::1");
        assert_eq!(obs[0].ipv6[0].kind, Ipv6Kind::LinkLocal);
        assert_eq!(obs[0].ipv6[0].scope.as_deref(), Some("eth0"));
        assert_eq!(obs[1].ipv6[0].kind, Ipv6Kind::Global);
    }

    #[test]
    fn ndp_zone_suffix_becomes_scope() {
        let output = "fe80::21b:63ff:fe91:1a%en0 a4:2b:b0:c9:00:01 en0 23h59m58s S R\n";
        let obs = parse_ndp_table(output);
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].ipv6[0].addr, "fe80::21b:63ff:fe91:1a");
        assert_eq!(obs[0].ipv6[0].scope.as_deref(), Some("en0"));
    }

    #[test]
    fn garbage_lines_yield_nothing() {
        assert!(parse_arp_table("no addresses here\n\n").is_empty());
        assert!(parse_ndp_table("???\n").is_empty());
    }
}
