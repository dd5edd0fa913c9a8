//! Multicast DNS wire parser
//!
//! Decodes just enough of the DNS message format to drive service
//! discovery: header, name decompression, and PTR / A / AAAA / SRV / TXT
//! answers. Within one response the PTR -> SRV -> A/AAAA chain is resolved
//! to associate a service instance with a hostname, port, and addresses.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::models::{DiscoverySource, Observation, Protocol, ServiceInfo};
use crate::network::ipv6::parse_ipv6;

pub const TYPE_A: u16 = 1;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;

const CLASS_IN: u16 = 1;
/// Cache-flush bit masked off record class on read.
const CLASS_MASK: u16 = 0x7fff;

/// Decoded record payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(String),
    Srv { port: u16, target: String },
    Txt(Vec<String>),
    Other,
}

#[derive(Debug, Clone)]
pub struct DnsAnswer {
    pub name: String,
    pub rtype: u16,
    pub data: RData,
}

#[derive(Debug, Clone)]
pub struct DnsPacket {
    pub id: u16,
    pub flags: u16,
    pub answers: Vec<DnsAnswer>,
}

impl DnsPacket {
    pub fn is_response(&self) -> bool {
        self.flags & 0x8000 != 0
    }
}

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*buf.get(at)?, *buf.get(at + 1)?]))
}

/// Decode a possibly-compressed name starting at `at`.
///
/// Returns the dotted name and the offset just past the name in the
/// original stream. A single back-pointer jump is followed; a pointer
/// encountered after jumping terminates decoding, which bounds malicious
/// pointer loops.
fn read_name(buf: &[u8], at: usize) -> Option<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = at;
    let mut next = None; // resume offset in the original stream
    let mut jumped = false;

    loop {
        let len = *buf.get(pos)? as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        if len & 0xc0 == 0xc0 {
            if jumped {
                break;
            }
            let pointer = (read_u16(buf, pos)? & 0x3fff) as usize;
            next = Some(pos + 2);
            pos = pointer;
            jumped = true;
            continue;
        }
        if len > 63 {
            return None;
        }
        let label = buf.get(pos + 1..pos + 1 + len)?;
        labels.push(String::from_utf8_lossy(label).to_string());
        pos += 1 + len;
        if labels.len() > 32 {
            return None;
        }
    }

    let end = match (jumped, next) {
        (true, Some(resume)) => resume,
        _ => pos,
    };
    Some((labels.join("."), end))
}

/// Parse a DNS message. Questions are skipped; answer, authority, and
/// additional records are all surfaced as answers. Returns `None` only
/// when the header itself is truncated.
pub fn parse_packet(buf: &[u8]) -> Option<DnsPacket> {
    let id = read_u16(buf, 0)?;
    let flags = read_u16(buf, 2)?;
    let qdcount = read_u16(buf, 4)?;
    let ancount = read_u16(buf, 6)?;
    let nscount = read_u16(buf, 8)?;
    let arcount = read_u16(buf, 10)?;

    let mut pos = 12;
    let mut packet = DnsPacket {
        id,
        flags,
        answers: Vec::new(),
    };

    for _ in 0..qdcount {
        let Some((_, end)) = read_name(buf, pos) else {
            return Some(packet);
        };
        pos = end + 4; // qtype + qclass
    }

    let record_total = u32::from(ancount) + u32::from(nscount) + u32::from(arcount);
    for _ in 0..record_total {
        let Some((name, end)) = read_name(buf, pos) else {
            break;
        };
        let Some(rtype) = read_u16(buf, end) else {
            break;
        };
        let Some(class) = read_u16(buf, end + 2) else {
            break;
        };
        let Some(rdlen) = read_u16(buf, end + 8) else {
            break;
        };
        let rdata_start = end + 10;
        let rdata_end = rdata_start + rdlen as usize;
        if buf.len() < rdata_end {
            break;
        }

        if class & CLASS_MASK == CLASS_IN {
            let data = match rtype {
                TYPE_A if rdlen == 4 => RData::A(Ipv4Addr::new(
                    buf[rdata_start],
                    buf[rdata_start + 1],
                    buf[rdata_start + 2],
                    buf[rdata_start + 3],
                )),
                TYPE_AAAA if rdlen == 16 => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(&buf[rdata_start..rdata_end]);
                    RData::Aaaa(Ipv6Addr::from(octets))
                }
                TYPE_PTR => match read_name(buf, rdata_start) {
                    Some((target, _)) => RData::Ptr(target),
                    None => RData::Other,
                },
                TYPE_SRV if rdlen >= 6 => {
                    let port = read_u16(buf, rdata_start + 4)?;
                    match read_name(buf, rdata_start + 6) {
                        Some((target, _)) => RData::Srv { port, target },
                        None => RData::Other,
                    }
                }
                TYPE_TXT => {
                    let mut strings = Vec::new();
                    let mut at = rdata_start;
                    while at < rdata_end {
                        let len = buf[at] as usize;
                        let Some(bytes) = buf.get(at + 1..at + 1 + len) else {
                            break;
                        };
                        strings.push(String::from_utf8_lossy(bytes).to_string());
                        at += 1 + len;
                    }
                    RData::Txt(strings)
                }
                _ => RData::Other,
            };
            packet.answers.push(DnsAnswer { name, rtype, data });
        }

        pos = rdata_end;
    }

    Some(packet)
}

/// Build a PTR query for one service type (e.g. `_http._tcp.local`).
pub fn build_ptr_query(id: u16, service: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + service.len() + 6);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&[0x00, 0x00]); // standard query
    buf.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    buf.extend_from_slice(&[0u8; 6]); // an/ns/ar
    for label in service.split('.').filter(|l| !l.is_empty()) {
        buf.push(label.len().min(63) as u8);
        buf.extend_from_slice(&label.as_bytes()[..label.len().min(63)]);
    }
    buf.push(0);
    buf.extend_from_slice(&TYPE_PTR.to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());
    buf
}

fn strip_local(name: &str) -> String {
    name.trim_end_matches('.')
        .trim_end_matches(".local")
        .to_string()
}

/// Service type embedded in a service instance name:
/// `Living Room._airplay._tcp.local` -> `_airplay._tcp`.
fn service_type_of(instance: &str) -> Option<String> {
    let at = instance.find("._")?;
    Some(strip_local(&instance[at + 1..]))
}

/// Resolve a response packet into per-host observations.
pub fn observations(packet: &DnsPacket) -> Vec<Observation> {
    // instance -> (target host, port)
    let mut srv: HashMap<&str, (String, u16)> = HashMap::new();
    // host -> addresses
    let mut a: HashMap<&str, Vec<Ipv4Addr>> = HashMap::new();
    let mut aaaa: HashMap<&str, Vec<Ipv6Addr>> = HashMap::new();
    // service instances seen via PTR
    let mut instances: Vec<&str> = Vec::new();

    for answer in &packet.answers {
        match &answer.data {
            RData::Ptr(target) => instances.push(target.as_str()),
            RData::Srv { port, target } => {
                srv.insert(answer.name.as_str(), (target.clone(), *port));
            }
            RData::A(addr) => a.entry(answer.name.as_str()).or_default().push(*addr),
            RData::Aaaa(addr) => aaaa.entry(answer.name.as_str()).or_default().push(*addr),
            _ => {}
        }
    }

    // host -> observation under construction
    let mut hosts: HashMap<String, Observation> = HashMap::new();

    fn ensure_host<'m>(
        hosts: &'m mut HashMap<String, Observation>,
        host: &str,
    ) -> &'m mut Observation {
        hosts.entry(host.to_string()).or_insert_with(|| {
            let mut obs = Observation::new(DiscoverySource::Mdns);
            obs.hostname = Some(strip_local(host));
            if host.trim_end_matches('.').ends_with(".local") {
                obs.fqdn = Some(host.trim_end_matches('.').to_string());
            }
            obs
        })
    }

    // SRV chains: instance -> host (+ port, service type).
    for (instance, (host, port)) in &srv {
        let obs = ensure_host(&mut hosts, host);
        if let Some(service_type) = service_type_of(instance) {
            let label = service_type
                .trim_start_matches('_')
                .split("._")
                .next()
                .unwrap_or("")
                .to_string();
            let protocol = if service_type.ends_with("_udp") {
                Protocol::Udp
            } else {
                Protocol::Tcp
            };
            if !obs.service_tags.contains(&service_type) {
                obs.service_tags.push(service_type);
            }
            obs.services
                .push(ServiceInfo::open(*port, protocol, label, ""));
            obs.ports.push(*port);
        }
    }

    // PTR-only instances whose SRV did not arrive in this packet still
    // contribute their service type, but only when the packet names
    // exactly one host to attach it to.
    for instance in instances {
        if srv.contains_key(instance) {
            continue;
        }
        if let Some(service_type) = service_type_of(instance)
            && hosts.len() == 1
            && let Some(obs) = hosts.values_mut().next()
            && !obs.service_tags.contains(&service_type)
        {
            obs.service_tags.push(service_type);
        }
    }

    // Address records.
    for (host, addrs) in a {
        let obs = ensure_host(&mut hosts, host);
        if obs.ipv4.is_none() {
            obs.ipv4 = addrs.first().copied();
        }
    }
    for (host, addrs) in aaaa {
        let obs = ensure_host(&mut hosts, host);
        for addr in addrs {
            if let Some(info) = parse_ipv6(&addr.to_string())
                && !obs.ipv6.iter().any(|e| e.addr == info.addr)
            {
                obs.ipv6.push(info);
            }
        }
    }

    hosts
        .into_values()
        .filter(|obs| !obs.is_anonymous() || obs.hostname.is_some())
        .collect()
}
