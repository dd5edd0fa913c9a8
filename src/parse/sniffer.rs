//! Packet-sniffer output parser
//!
//! Stream-oriented: chunks of sniffer stdout are pushed in and partial
//! lines are buffered until complete. Each complete line is classified as
//! DHCPv4, DHCPv6, ICMPv6, NetBIOS name service, ARP, or a generic
//! IPv4/IPv6 frame.
//!
//! Hostnames learnt from DHCP and NetBIOS are retained in a MAC-keyed side
//! index; later frames from the same MAC are enriched from it. The index
//! never touches the device store directly: every learning or application
//! surfaces as an ordinary observation.

use regex::Regex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use crate::models::{DiscoverySource, Ipv6Kind, Observation};
use crate::network::ipv6::parse_ipv6;
use crate::network::mac::{is_multicast_mac, normalize_mac};

fn ether_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\S+\s+([0-9A-Fa-f:]{17}) > ([0-9A-Fa-f:]{17}), ethertype (\S+)",
        )
        .unwrap()
    })
}

fn ip_pair() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"length \d+: (\S+) > (\S+):").unwrap())
}

fn hostname_option() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"Hostname[^"]*"([^"]+)""#).unwrap())
}

fn vendor_class_option() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"Vendor-Class[^"]*"([^"]+)""#).unwrap())
}

fn requested_ip_option() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Requested-IP[^\d]*(\d+\.\d+\.\d+\.\d+)").unwrap())
}

fn fqdn_option() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"FQDN[^"]*"([^"]+)""#).unwrap())
}

fn ia_addr_option() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"IA_ADDR ([0-9A-Fa-f:]+)").unwrap())
}

fn netbios_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"NB\s+([A-Za-z][A-Za-z0-9\-_]{0,14})").unwrap())
}

/// Stateful sniffer-output parser.
pub struct SnifferParser {
    buf: String,
    /// Canonical MAC -> hostname learnt from DHCP and NetBIOS.
    hostnames: HashMap<String, String>,
    /// MAC of the most recent DHCPv4/DHCPv6 packet line, for attributing
    /// option continuation lines.
    last_dhcp_mac: Option<String>,
}

impl SnifferParser {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            hostnames: HashMap::new(),
            last_dhcp_mac: None,
        }
    }

    /// Hostname previously learnt for a MAC, if any.
    pub fn hostname_for(&self, mac: &str) -> Option<&str> {
        self.hostnames.get(mac).map(|s| s.as_str())
    }

    /// Feed a chunk of sniffer stdout; returns observations for every line
    /// completed by this chunk. Incomplete trailing data is buffered.
    pub fn push(&mut self, chunk: &str) -> Vec<Observation> {
        self.buf.push_str(chunk);
        let mut observations = Vec::new();

        while let Some(newline) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=newline).collect();
            observations.extend(self.parse_line(line.trim_end()));
        }

        observations
    }

    /// Parse one complete line.
    pub fn parse_line(&mut self, line: &str) -> Vec<Observation> {
        if line.is_empty() {
            return Vec::new();
        }

        // Option continuation lines (verbose DHCP decode) are indented and
        // carry no ethernet header; attribute them to the last DHCP client.
        if line.starts_with([' ', '\t']) {
            return self.parse_option_line(line);
        }

        let header = ether_header().captures(line);
        let (src_mac, dst_mac, ethertype) = match &header {
            Some(caps) => (
                normalize_mac(&caps[1]),
                normalize_mac(&caps[2]),
                caps[3].trim_end_matches(',').to_string(),
            ),
            None => (None, None, String::new()),
        };

        if line.contains("BOOTP/DHCP") {
            self.parse_dhcpv4(line, src_mac)
        } else if line.contains("dhcp6") {
            self.parse_dhcpv6(line, src_mac)
        } else if line.contains("ICMP6") && line.contains("neighbor") {
            self.parse_icmpv6_neighbor(line, src_mac)
        } else if line.contains("NBT UDP PACKET(137)") || line.contains(".137 > ") {
            self.parse_netbios(line, src_mac)
        } else if ethertype == "ARP" {
            self.parse_arp_frame(line, src_mac)
        } else if ethertype == "IPv4" || ethertype == "IPv6" {
            self.parse_generic_frame(line, src_mac, dst_mac)
        } else {
            Vec::new()
        }
    }

    fn parse_option_line(&mut self, line: &str) -> Vec<Observation> {
        let Some(mac) = self.last_dhcp_mac.clone() else {
            return Vec::new();
        };
        let mut observations = Vec::new();

        if let Some(caps) = hostname_option().captures(line) {
            let hostname = caps[1].to_string();
            self.hostnames.insert(mac.clone(), hostname.clone());
            let mut obs = Observation::new(DiscoverySource::Capture);
            obs.mac = Some(mac.clone());
            obs.hostname = Some(hostname);
            observations.push(obs);
        }
        if let Some(caps) = fqdn_option().captures(line) {
            let fqdn = caps[1].to_string();
            let mut obs = Observation::new(DiscoverySource::Capture);
            obs.mac = Some(mac.clone());
            obs.hostname = fqdn.split('.').next().map(|s| s.to_string());
            obs.fqdn = Some(fqdn.clone());
            if let Some(name) = &obs.hostname {
                self.hostnames.insert(mac.clone(), name.clone());
            }
            observations.push(obs);
        }
        if let Some(caps) = vendor_class_option().captures(line) {
            let mut obs = Observation::new(DiscoverySource::Capture);
            obs.mac = Some(mac.clone());
            obs.os_hint = Some(caps[1].to_string());
            observations.push(obs);
        }
        if let Some(caps) = requested_ip_option().captures(line)
            && let Ok(ip) = caps[1].parse::<Ipv4Addr>()
        {
            let mut obs = Observation::new(DiscoverySource::Capture);
            obs.mac = Some(mac.clone());
            obs.ipv4 = Some(ip);
            observations.push(obs);
        }
        if let Some(caps) = ia_addr_option().captures(line)
            && let Some(info) = parse_ipv6(&caps[1])
            && info.kind != Ipv6Kind::LinkLocal
            && info.kind != Ipv6Kind::Multicast
        {
            let mut obs = Observation::new(DiscoverySource::Capture);
            obs.mac = Some(mac);
            obs.ipv6.push(info);
            observations.push(obs);
        }

        observations
    }

    fn parse_dhcpv4(&mut self, line: &str, src_mac: Option<String>) -> Vec<Observation> {
        // The client MAC is authoritative from "Request from <mac>"; the
        // ethernet source may be a relay.
        static FROM: OnceLock<Regex> = OnceLock::new();
        let from = FROM.get_or_init(|| {
            Regex::new(r"(?:Request|Reply) from ([0-9A-Fa-f:]{11,17})").unwrap()
        });

        let client_mac = from
            .captures(line)
            .and_then(|caps| normalize_mac(&caps[1]))
            .or(src_mac);

        let Some(mac) = client_mac else {
            return Vec::new();
        };
        self.last_dhcp_mac = Some(mac.clone());

        let mut obs = Observation::new(DiscoverySource::Capture);
        obs.mac = Some(mac.clone());

        static YOUR_IP: OnceLock<Regex> = OnceLock::new();
        let your_ip =
            YOUR_IP.get_or_init(|| Regex::new(r"Your-IP (\d+\.\d+\.\d+\.\d+)").unwrap());
        if let Some(caps) = your_ip.captures(line)
            && let Ok(ip) = caps[1].parse::<Ipv4Addr>()
        {
            obs.ipv4 = Some(ip);
        }

        // Single-line (non-verbose) decodes may inline options too.
        if let Some(caps) = hostname_option().captures(line) {
            let hostname = caps[1].to_string();
            self.hostnames.insert(mac, hostname.clone());
            obs.hostname = Some(hostname);
        }

        if obs.is_anonymous() && obs.hostname.is_none() {
            return Vec::new();
        }
        vec![obs]
    }

    fn parse_dhcpv6(&mut self, line: &str, src_mac: Option<String>) -> Vec<Observation> {
        let Some(mac) = src_mac else {
            return Vec::new();
        };
        self.last_dhcp_mac = Some(mac.clone());

        let mut obs = Observation::new(DiscoverySource::Capture);
        obs.mac = Some(mac);

        if let Some(caps) = fqdn_option().captures(line) {
            let fqdn = caps[1].to_string();
            obs.hostname = fqdn.split('.').next().map(|s| s.to_string());
            obs.fqdn = Some(fqdn);
            if let (Some(mac), Some(name)) = (&obs.mac, &obs.hostname) {
                self.hostnames.insert(mac.clone(), name.clone());
            }
        }
        for caps in ia_addr_option().captures_iter(line) {
            if let Some(info) = parse_ipv6(&caps[1])
                && info.kind != Ipv6Kind::LinkLocal
                && info.kind != Ipv6Kind::Multicast
            {
                obs.ipv6.push(info);
            }
        }

        vec![obs]
    }

    fn parse_icmpv6_neighbor(&mut self, line: &str, src_mac: Option<String>) -> Vec<Observation> {
        let Some(mac) = src_mac else {
            return Vec::new();
        };

        let mut obs = Observation::new(DiscoverySource::Capture);
        obs.mac = Some(mac.clone());

        static TGT: OnceLock<Regex> = OnceLock::new();
        let tgt = TGT.get_or_init(|| Regex::new(r"(?:tgt is|who has) ([0-9A-Fa-f:]+)").unwrap());
        if let Some(caps) = tgt.captures(line)
            && let Some(info) = parse_ipv6(&caps[1])
            && info.kind != Ipv6Kind::Multicast
        {
            obs.ipv6.push(info);
        }

        // The IPv6 source of the frame is an address of the same node
        // unless unspecified (DAD probes) or multicast.
        if let Some(caps) = ip_pair().captures(line)
            && let Some(info) = parse_ipv6(strip_port(&caps[1]))
            && info.kind != Ipv6Kind::Multicast
            && info.addr != "::"
            && !obs.ipv6.iter().any(|e| e.addr == info.addr)
        {
            obs.ipv6.push(info);
        }

        if obs.ipv6.is_empty() {
            return Vec::new();
        }
        self.enrich_hostname(&mut obs, &mac);
        vec![obs]
    }

    fn parse_netbios(&mut self, line: &str, src_mac: Option<String>) -> Vec<Observation> {
        let mut obs = Observation::new(DiscoverySource::Capture);

        if let Some(caps) = ip_pair().captures(line)
            && let Ok(ip) = strip_port(&caps[1]).parse::<Ipv4Addr>()
        {
            obs.ipv4 = Some(ip);
        }

        if let Some(caps) = netbios_name().captures(line) {
            let name = caps[1].to_string();
            if name != "WORKGROUP" && name != "MSHOME" {
                obs.hostname = Some(name.clone());
                if let Some(mac) = &src_mac {
                    self.hostnames.insert(mac.clone(), name);
                }
            }
        }

        obs.mac = src_mac;
        if obs.is_anonymous() {
            return Vec::new();
        }
        vec![obs]
    }

    fn parse_arp_frame(&mut self, line: &str, src_mac: Option<String>) -> Vec<Observation> {
        let Some(mac) = src_mac else {
            return Vec::new();
        };

        static TELL: OnceLock<Regex> = OnceLock::new();
        let tell = TELL.get_or_init(|| {
            Regex::new(r"(?:tell|Reply) (\d+\.\d+\.\d+\.\d+)").unwrap()
        });
        let Some(caps) = tell.captures(line) else {
            return Vec::new();
        };
        let Ok(ip) = caps[1].parse::<Ipv4Addr>() else {
            return Vec::new();
        };

        let mut obs = Observation::new(DiscoverySource::Capture);
        obs.mac = Some(mac.clone());
        obs.ipv4 = Some(ip);
        self.enrich_hostname(&mut obs, &mac);
        vec![obs]
    }

    fn parse_generic_frame(
        &mut self,
        line: &str,
        src_mac: Option<String>,
        dst_mac: Option<String>,
    ) -> Vec<Observation> {
        let Some(caps) = ip_pair().captures(line) else {
            return Vec::new();
        };
        let src_ip = strip_port(&caps[1]).to_string();
        let dst_ip = strip_port(&caps[2]).to_string();

        let mut observations = Vec::new();

        if let Some(mac) = src_mac
            && let Some(obs) = self.frame_observation(&mac, &src_ip)
        {
            observations.push(obs);
        }

        // Destination pair is suppressed for broadcast/multicast targets.
        if let Some(mac) = dst_mac
            && !is_multicast_mac(&mac)
            && !is_suppressed_destination(&dst_ip)
            && let Some(obs) = self.frame_observation(&mac, &dst_ip)
        {
            observations.push(obs);
        }

        observations
    }

    fn frame_observation(&self, mac: &str, ip: &str) -> Option<Observation> {
        let mut obs = Observation::new(DiscoverySource::Capture);
        obs.mac = Some(mac.to_string());

        if let Ok(v4) = ip.parse::<Ipv4Addr>() {
            if v4.is_broadcast() || v4.is_multicast() || v4.is_unspecified() {
                return None;
            }
            obs.ipv4 = Some(v4);
        } else if let Some(info) = parse_ipv6(ip) {
            if info.kind == Ipv6Kind::Multicast || info.addr == "::" {
                return None;
            }
            obs.ipv6.push(info);
        } else {
            return None;
        }

        if let Some(hostname) = self.hostnames.get(mac) {
            obs.hostname = Some(hostname.clone());
        }
        Some(obs)
    }

    fn enrich_hostname(&self, obs: &mut Observation, mac: &str) {
        if obs.hostname.is_none()
            && let Some(hostname) = self.hostnames.get(mac)
        {
            obs.hostname = Some(hostname.clone());
        }
    }
}

impl Default for SnifferParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove a trailing `.port` segment from a sniffer address token.
fn strip_port(token: &str) -> &str {
    match token.rsplit_once('.') {
        Some((head, tail))
            if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) && head.contains(':') =>
        {
            // IPv6 with port: "fe80::1.546".
            head
        }
        Some((head, tail))
            if !tail.is_empty()
                && tail.chars().all(|c| c.is_ascii_digit())
                && head.matches('.').count() == 3 =>
        {
            // IPv4 with port: "192.168.1.10.68".
            head
        }
        _ => token,
    }
}

/// Multicast/broadcast destination addresses are never device identities.
/// IPv6 comparison is done on the lower-cased form.
fn is_suppressed_destination(ip: &str) -> bool {
    if let Ok(v4) = ip.parse::<Ipv4Addr>() {
        return v4.is_broadcast() || v4.is_multicast();
    }
    ip.to_lowercase().starts_with("ff")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> SnifferParser {
        SnifferParser::new()
    }

    #[test]
    fn buffers_partial_lines_across_chunks() {
        let mut p = parser();
        let first = p.push("12:00:00.1 aa:bb:cc:dd:ee:01 > 11:22:33:44:55:66, ethertype IPv4 (0x0800), len");
        assert!(first.is_empty());
        let second = p.push("gth 98: 192.168.1.10.443 > 192.168.1.20.51234: Flags [.]\n");
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].ipv4, Some(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(second[1].ipv4, Some(Ipv4Addr::new(192, 168, 1, 20)));
    }

    #[test]
    fn broadcast_destination_suppressed() {
        let mut p = parser();
        let obs = p.push(
            "12:00:00.1 aa:bb:cc:dd:ee:01 > ff:ff:ff:ff:ff:ff, ethertype IPv4 (0x0800), length 98: 192.168.1.10.137 > 192.168.1.255.137: UDP\n",
        );
        // Classified as NetBIOS by port; only the source side survives.
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].ipv4, Some(Ipv4Addr::new(192, 168, 1, 10)));
    }

    #[test]
    fn ipv6_multicast_destination_suppressed_case_insensitively() {
        let mut p = parser();
        let obs = p.push(
            "12:00:00.1 aa:bb:cc:dd:ee:01 > 33:33:00:00:00:01, ethertype IPv6 (0x86dd), length 98: fe80::1.5353 > FF02::FB.5353: UDP\n",
        );
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].ipv6[0].addr, "fe80::1");
    }

    #[test]
    fn dhcp_hostname_learned_and_applied() {
        let mut p = parser();
        let learned = p.push(concat!(
            "12:00:00.1 aa:bb:cc:dd:ee:01 > ff:ff:ff:ff:ff:ff, ethertype IPv4 (0x0800), length 342: ",
            "0.0.0.0.68 > 255.255.255.255.67: BOOTP/DHCP, Request from aa:bb:cc:dd:ee:01, length 300\n",
            "\t    Hostname Option 12, length 9: \"my-laptop\"\n",
        ));
        assert!(learned.iter().any(|o| o.hostname.as_deref() == Some("my-laptop")));

        // Later plain frame from the same MAC is enriched in-place.
        let applied = p.push(
            "12:00:05.0 aa:bb:cc:dd:ee:01 > 11:22:33:44:55:66, ethertype IPv4 (0x0800), length 98: 192.168.1.50.5000 > 192.168.1.1.80: Flags [S]\n",
        );
        assert_eq!(applied[0].hostname.as_deref(), Some("my-laptop"));
        assert_eq!(applied[0].ipv4, Some(Ipv4Addr::new(192, 168, 1, 50)));
    }

    #[test]
    fn dhcpv6_fqdn_and_addresses() {
        let mut p = parser();
        let obs = p.push(concat!(
            "12:00:00.1 aa:bb:cc:dd:ee:02 > 33:33:00:01:00:02, ethertype IPv6 (0x86dd), length 160: ",
            "fe80::2.546 > ff02::1:2.547: dhcp6 request (FQDN \"host-a.lan\") (IA_ADDR 2001:db8::55 pltime 3600)\n",
        ));
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].fqdn.as_deref(), Some("host-a.lan"));
        assert_eq!(obs[0].hostname.as_deref(), Some("host-a"));
        assert_eq!(obs[0].ipv6.len(), 1);
        assert_eq!(obs[0].ipv6[0].addr, "2001:db8::55");
    }

    #[test]
    fn icmpv6_neighbor_advertisement_targets() {
        let mut p = parser();
        let obs = p.push(concat!(
            "12:00:00.1 aa:bb:cc:dd:ee:03 > 33:33:00:00:00:01, ethertype IPv6 (0x86dd), length 86: ",
            "fe80::3 > ff02::1: ICMP6, neighbor advertisement, tgt is 2001:db8::77, length 32\n",
        ));
        assert_eq!(obs.len(), 1);
        let addrs: Vec<&str> = obs[0].ipv6.iter().map(|i| i.addr.as_str()).collect();
        assert!(addrs.contains(&"2001:db8::77"));
        assert!(addrs.contains(&"fe80::3"));
        assert_eq!(obs[0].mac.as_deref(), Some("AA:BB:CC:DD:EE:03"));
    }

    #[test]
    fn netbios_name_extracted() {
        let mut p = parser();
        let obs = p.push(concat!(
            "12:00:00.1 aa:bb:cc:dd:ee:04 > ff:ff:ff:ff:ff:ff, ethertype IPv4 (0x0800), length 110: ",
            "192.168.1.60.137 > 192.168.1.255.137: NBT UDP PACKET(137): REGISTRATION; REQUEST; BROADCAST NB DESKTOP-XYZ\n",
        ));
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].hostname.as_deref(), Some("DESKTOP-XYZ"));
        assert_eq!(obs[0].ipv4, Some(Ipv4Addr::new(192, 168, 1, 60)));
        assert_eq!(p.hostname_for("AA:BB:CC:DD:EE:04"), Some("DESKTOP-XYZ"));
    }

    #[test]
    fn arp_tell_yields_sender_pair() {
        let mut p = parser();
        let obs = p.push(
            "12:00:00.1 aa:bb:cc:dd:ee:05 > ff:ff:ff:ff:ff:ff, ethertype ARP (0x0806), length 42: Request who-has 192.168.1.1 tell 192.168.1.70, length 28\n",
        );
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].ipv4, Some(Ipv4Addr::new(192, 168, 1, 70)));
        assert_eq!(obs[0].mac.as_deref(), Some("AA:BB:CC:DD:EE:05"));
    }

    #[test]
    fn garbage_is_total() {
        let mut p = parser();
        assert!(p.push("complete garbage\n\n???\n").is_empty());
    }
}
