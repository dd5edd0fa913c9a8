//! Active port-scanner output parser
//!
//! Stateful line scanner over the scanner's normal-format output. The
//! "scan report for" header opens a block for one target; every line until
//! the next header contributes to that block's observation.

use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use crate::models::{DiscoverySource, Observation, Protocol, ServiceInfo};
use crate::network::ipv6::parse_ipv6;
use crate::network::mac::normalize_mac;

fn port_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{1,5})/(tcp|udp)\s+open\s+(\S+)(?:\s+(.+))?$").unwrap()
    })
}

fn mac_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^MAC Address:\s+([0-9A-Fa-f:]{11,17})(?:\s+\(([^)]+)\))?").unwrap()
    })
}

fn header_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Nmap scan report for\s+(\S+)(?:\s+\(([^)]+)\))?").unwrap()
    })
}

/// Parse complete scanner output; one observation per scan-report block.
pub fn parse_scan_report(output: &str) -> Vec<Observation> {
    let mut observations = Vec::new();
    let mut current: Option<Observation> = None;

    for line in output.lines() {
        if let Some(caps) = header_line().captures(line) {
            flush(&mut current, &mut observations);
            let mut obs = Observation::new(DiscoverySource::PortScan);
            let primary = &caps[1];
            match caps.get(2) {
                Some(addr) => {
                    // Header carries both a name and an address.
                    set_address(&mut obs, addr.as_str());
                    set_hostname(&mut obs, primary);
                }
                None => set_address(&mut obs, primary),
            }
            current = Some(obs);
            continue;
        }

        let Some(obs) = current.as_mut() else {
            continue;
        };

        if let Some(caps) = mac_line().captures(line) {
            obs.mac = normalize_mac(&caps[1]);
            if let Some(vendor) = caps.get(2)
                && vendor.as_str() != "Unknown"
            {
                obs.vendor_hint = Some(vendor.as_str().to_string());
            }
            continue;
        }

        if let Some(caps) = port_line().captures(line) {
            let Ok(port) = caps[1].parse::<u16>() else {
                continue;
            };
            if port == 0 {
                continue;
            }
            let protocol = if &caps[2] == "udp" { Protocol::Udp } else { Protocol::Tcp };
            let version = caps
                .get(4)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            obs.ports.push(port);
            obs.services
                .push(ServiceInfo::open(port, protocol, &caps[3], version));
            continue;
        }

        let trimmed = line.trim_start_matches(['|', '_', ' ']).trim();

        if let Some(rest) = trimmed.strip_prefix("OS details:") {
            obs.os_hint = Some(rest.trim().to_string());
        } else if let Some(rest) = trimmed.strip_prefix("Running:") {
            if obs.os_hint.is_none() {
                obs.os_hint = Some(rest.trim().to_string());
            }
        } else if let Some(rest) = trimmed.strip_prefix("OS CPE:") {
            if obs.os_hint.is_none() {
                obs.os_hint = Some(rest.trim().to_string());
            }
        } else if let Some(rest) = trimmed.strip_prefix("Service Info: OS:") {
            if obs.os_hint.is_none() {
                let os = rest.split(';').next().unwrap_or("").trim();
                if !os.is_empty() {
                    obs.os_hint = Some(os.to_string());
                }
            }
        } else if let Some(rest) = trimmed.strip_prefix("nbstat: NetBIOS name:") {
            if let Some(name) = rest.split(',').next() {
                set_if_unset(&mut obs.hostname, name.trim());
            }
        } else if let Some(rest) = trimmed.strip_prefix("Computer name:") {
            set_if_unset(&mut obs.hostname, rest.trim());
        } else if let Some(rest) = trimmed.strip_prefix("Target_Name:") {
            set_if_unset(&mut obs.hostname, rest.trim());
        } else if let Some(rest) = trimmed.strip_prefix("NetBIOS computer name:") {
            set_if_unset(&mut obs.hostname, rest.trim().trim_end_matches("\\x00"));
        } else if let Some(rest) = trimmed.strip_prefix("DNS_Computer_Name:") {
            set_if_unset(&mut obs.fqdn, rest.trim());
        } else if let Some(rest) = trimmed.strip_prefix("DNS_Domain_Name:") {
            set_if_unset(&mut obs.workgroup, rest.trim());
        } else if let Some(rest) = trimmed.strip_prefix("Workgroup:") {
            set_if_unset(&mut obs.workgroup, rest.trim().trim_end_matches("\\x00"));
        } else if let Some(rest) = trimmed.strip_prefix("Domain name:") {
            set_if_unset(&mut obs.workgroup, rest.trim());
        }
    }

    flush(&mut current, &mut observations);
    observations
}

fn flush(current: &mut Option<Observation>, out: &mut Vec<Observation>) {
    if let Some(obs) = current.take()
        && !obs.is_anonymous()
    {
        out.push(obs);
    }
}

/// The header address may be either family.
fn set_address(obs: &mut Observation, addr: &str) {
    if let Ok(v4) = addr.parse::<Ipv4Addr>() {
        obs.ipv4 = Some(v4);
    } else if let Some(info) = parse_ipv6(addr) {
        obs.ipv6.push(info);
    }
}

fn set_hostname(obs: &mut Observation, name: &str) {
    if name.parse::<Ipv4Addr>().is_ok() || parse_ipv6(name).is_some() {
        return;
    }
    if name.contains('.') {
        obs.fqdn = Some(name.to_string());
        obs.hostname = name.split('.').next().map(|s| s.to_string());
    } else {
        obs.hostname = Some(name.to_string());
    }
}

fn set_if_unset(slot: &mut Option<String>, value: &str) {
    if slot.is_none() && !value.is_empty() && value != "<unknown>" {
        *slot = Some(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOWS_REPORT: &str = "\
Starting Nmap 7.94 ( https://nmap.org )
Nmap scan report for 192.168.1.30
Host is up (0.0021s latency).

PORT     STATE SERVICE       VERSION
135/tcp  open  msrpc         Microsoft Windows RPC
445/tcp  open  microsoft-ds  Windows 10 microsoft-ds
3389/tcp open  ms-wbt-server Microsoft Terminal Services
MAC Address: 11:22:33:44:55:66 (Micro-Star Intl)
OS CPE: cpe:/o:microsoft:windows_10
OS details: Microsoft Windows 10 1903
Host script results:
| nbstat: NetBIOS name: DESKTOP-ABC, NetBIOS user: <unknown>, NetBIOS MAC: 11:22:33:44:55:66
| smb-os-discovery:
|   Computer name: desktop-abc
|   Workgroup: WORKGROUP\\x00
|_  System time: 2025-01-15T10:00:00
";

    #[test]
    fn windows_block_collects_all_fields() {
        let obs = parse_scan_report(WINDOWS_REPORT);
        assert_eq!(obs.len(), 1);
        let o = &obs[0];
        assert_eq!(o.ipv4, Some(Ipv4Addr::new(192, 168, 1, 30)));
        assert_eq!(o.mac.as_deref(), Some("11:22:33:44:55:66"));
        assert_eq!(o.vendor_hint.as_deref(), Some("Micro-Star Intl"));
        assert_eq!(o.hostname.as_deref(), Some("DESKTOP-ABC"));
        assert_eq!(o.workgroup.as_deref(), Some("WORKGROUP"));
        assert_eq!(o.os_hint.as_deref(), Some("Microsoft Windows 10 1903"));
        assert_eq!(o.ports, vec![135, 445, 3389]);
        assert_eq!(o.services.len(), 3);
        assert_eq!(o.services[1].name, "microsoft-ds");
    }

    #[test]
    fn hostname_header_with_address() {
        let output = "\
Nmap scan report for printer.lan (192.168.1.50)
Host is up.
631/tcp open  ipp CUPS 2.4
";
        let obs = parse_scan_report(output);
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].hostname.as_deref(), Some("printer"));
        assert_eq!(obs[0].fqdn.as_deref(), Some("printer.lan"));
        assert_eq!(obs[0].services[0].version, "CUPS 2.4");
    }

    #[test]
    fn ipv6_header_recognised() {
        let output = "\
Nmap scan report for 2001:db8::5
Host is up.
22/tcp open  ssh OpenSSH 9.6
";
        let obs = parse_scan_report(output);
        assert_eq!(obs.len(), 1);
        assert!(obs[0].ipv4.is_none());
        assert_eq!(obs[0].ipv6[0].addr, "2001:db8::5");
    }

    #[test]
    fn multiple_blocks_split_correctly() {
        let output = "\
Nmap scan report for 192.168.1.1
Host is up.
80/tcp open  http
Nmap scan report for 192.168.1.2
Host is up.
22/tcp open  ssh
";
        let obs = parse_scan_report(output);
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].ports, vec![80]);
        assert_eq!(obs[1].ports, vec![22]);
    }

    #[test]
    fn closed_ports_and_noise_ignored() {
        let output = "\
Nmap scan report for 192.168.1.9
Host is up.
22/tcp closed ssh
137/udp open|filtered netbios-ns
Not shown: 998 filtered tcp ports
";
        let obs = parse_scan_report(output);
        assert_eq!(obs.len(), 1);
        assert!(obs[0].ports.is_empty());
    }

    #[test]
    fn running_line_used_when_no_details() {
        let output = "\
Nmap scan report for 192.168.1.12
Running: Linux 5.X|6.X
";
        let obs = parse_scan_report(output);
        assert_eq!(obs[0].os_hint.as_deref(), Some("Linux 5.X|6.X"));
    }

    #[test]
    fn rdp_ntlm_fields() {
        let output = "\
Nmap scan report for 192.168.1.40
3389/tcp open  ms-wbt-server
| rdp-ntlm-info:
|   Target_Name: WORKBOX
|   DNS_Computer_Name: workbox.corp.lan
|   DNS_Domain_Name: corp.lan
|_  Product_Version: 10.0.19041
";
        let obs = parse_scan_report(output);
        assert_eq!(obs[0].hostname.as_deref(), Some("WORKBOX"));
        assert_eq!(obs[0].fqdn.as_deref(), Some("workbox.corp.lan"));
        assert_eq!(obs[0].workgroup.as_deref(), Some("corp.lan"));
    }

    #[test]
    fn garbage_input_is_total() {
        assert!(parse_scan_report("").is_empty());
        assert!(parse_scan_report("random noise\nmore noise").is_empty());
    }
}
