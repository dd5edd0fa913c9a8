//! mDNS service-discovery driver
//!
//! Prefers the platform mDNS browser tool when present; otherwise falls
//! back to a pure implementation that joins the mDNS multicast groups,
//! sends PTR queries for a curated service-type set, and decodes the
//! responses itself.

use anyhow::{Context, Result};
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::config::MDNS_SERVICE_TYPES;
use crate::drivers::{CancelFlag, ObservationTx, emit_all, run_tool, tool_available};
use crate::models::{DiscoverySource, Observation, Protocol, ServiceInfo};
use crate::network::ipv6::parse_ipv6;
use crate::parse::mdns::{build_ptr_query, observations, parse_packet};

const MDNS_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
const MDNS_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);
const MDNS_PORT: u16 = 5353;

/// Run mDNS discovery for `window`, emitting one observation per distinct
/// host discovered.
pub async fn run_mdns(tx: ObservationTx, cancel: CancelFlag, window: Duration, ipv6: bool) {
    if tool_available("avahi-browse") {
        match browse_with_tool(&cancel, window).await {
            Ok(observations) => {
                tracing::debug!("avahi-browse yielded {} hosts", observations.len());
                let _ = emit_all(&tx, observations).await;
                return;
            }
            Err(e) => {
                tracing::debug!("avahi-browse failed ({}), using built-in responder", e);
            }
        }
    }

    if let Err(e) = query_and_listen(&tx, &cancel, window, ipv6).await
        && !cancel.is_cancelled()
    {
        tracing::warn!("mDNS discovery degraded: {}", e);
    }
}

/// Parse `avahi-browse --parsable` resolved lines:
/// `=;eth0;IPv4;Printer;_ipp._tcp;local;host.local;192.168.1.50;631;"..."`.
fn parse_avahi_output(output: &str) -> Vec<Observation> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut result: Vec<Observation> = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split(';').collect();
        if fields.first() != Some(&"=") || fields.len() < 9 {
            continue;
        }
        let service_type = fields[4].to_string();
        let host = fields[6].trim_end_matches(".local").to_string();
        let addr = fields[7].to_string();
        let port: Option<u16> = fields[8].parse().ok();

        if host.is_empty() {
            continue;
        }

        if seen.insert((host.clone(), addr.clone())) {
            let mut obs = Observation::new(DiscoverySource::Mdns);
            obs.hostname = Some(host);
            obs.fqdn = Some(format!("{}.local", fields[6].trim_end_matches(".local")));
            if let Ok(v4) = addr.parse::<Ipv4Addr>() {
                obs.ipv4 = Some(v4);
            } else if let Some(info) = parse_ipv6(&addr) {
                obs.ipv6.push(info);
            }
            if let Some(port) = port
                && port > 0
            {
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
                obs.services.push(ServiceInfo::open(port, protocol, label, ""));
                obs.ports.push(port);
            }
            obs.service_tags.push(service_type);
            result.push(obs);
        } else if let Some(existing) = result
            .iter_mut()
            .find(|o| o.hostname.as_deref() == Some(fields[6].trim_end_matches(".local")))
            && !existing.service_tags.contains(&service_type)
        {
            existing.service_tags.push(service_type);
        }
    }

    result
}

async fn browse_with_tool(cancel: &CancelFlag, window: Duration) -> Result<Vec<Observation>> {
    let output = run_tool(
        "avahi-browse",
        &["--all", "--resolve", "--parsable", "--terminate"],
        window + Duration::from_secs(5),
        cancel,
    )
    .await?;
    Ok(parse_avahi_output(&output))
}

fn open_v4_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP))
        .context("mDNS v4 socket")?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT).into())?;
    socket.join_multicast_v4(&MDNS_V4, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into()).context("mDNS v4 socket registration")
}

fn open_v6_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(SockProtocol::UDP))
        .context("mDNS v6 socket")?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_only_v6(true)?;
    socket.bind(&SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, MDNS_PORT, 0, 0).into())?;
    socket.join_multicast_v6(&MDNS_V6, 0)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into()).context("mDNS v6 socket registration")
}

/// Pure fallback: query the curated service types and listen for the
/// window, correlating each response packet into per-host observations.
async fn query_and_listen(
    tx: &ObservationTx,
    cancel: &CancelFlag,
    window: Duration,
    ipv6: bool,
) -> Result<()> {
    let v4 = open_v4_socket()?;
    let v6 = if ipv6 {
        match open_v6_socket() {
            Ok(socket) => Some(socket),
            Err(e) => {
                tracing::debug!("mDNS IPv6 listener unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    // One PTR query per curated service type, both families.
    for (index, service) in MDNS_SERVICE_TYPES.iter().enumerate() {
        let query = build_ptr_query(index as u16 + 1, service);
        let _ = v4
            .send_to(&query, SocketAddr::from((MDNS_V4, MDNS_PORT)))
            .await;
        if let Some(v6) = &v6 {
            let _ = v6
                .send_to(&query, SocketAddr::from((MDNS_V6, MDNS_PORT)))
                .await;
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut buf_v4 = [0u8; 4096];
    let mut buf_v6 = [0u8; 4096];
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            received = v4.recv_from(&mut buf_v4) => {
                if let Ok((len, peer)) = received {
                    handle_packet(tx, &buf_v4[..len], peer, &mut seen).await;
                }
            }
            received = async {
                match &v6 {
                    Some(socket) => socket.recv_from(&mut buf_v6).await,
                    None => std::future::pending().await,
                }
            } => {
                if let Ok((len, peer)) = received {
                    handle_packet(tx, &buf_v6[..len], peer, &mut seen).await;
                }
            }
            _ = cancel.cancelled() => break,
            _ = &mut deadline => break,
        }
    }

    Ok(())
}

async fn handle_packet(
    tx: &ObservationTx,
    buf: &[u8],
    peer: SocketAddr,
    seen: &mut HashSet<String>,
) {
    let Some(packet) = parse_packet(buf) else {
        return;
    };
    if !packet.is_response() {
        return;
    }

    let mut fresh = Vec::new();
    for mut obs in observations(&packet) {
        // The responder's own address backs a host that published no
        // address records in this packet.
        if obs.ipv4.is_none() && obs.ipv6.is_empty() {
            match peer.ip() {
                IpAddr::V4(v4) => obs.ipv4 = Some(v4),
                IpAddr::V6(v6) => {
                    if let Some(info) = parse_ipv6(&v6.to_string()) {
                        obs.ipv6.push(info);
                    }
                }
            }
        }
        let key = obs
            .hostname
            .clone()
            .unwrap_or_else(|| peer.ip().to_string());
        if seen.insert(key) {
            fresh.push(obs);
        }
    }
    let _ = emit_all(tx, fresh).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avahi_parsable_lines() {
        let output = "\
+;eth0;IPv4;Printer;_ipp._tcp;local
=;eth0;IPv4;Printer;_ipp._tcp;local;printer.local;192.168.1.50;631;\"txtvers=1\"
=;eth0;IPv4;Printer Web;_http._tcp;local;printer.local;192.168.1.50;80;\"\"
=;eth0;IPv6;Cast;_googlecast._tcp;local;tv.local;fe80::5;8009;\"\"
";
        let obs = parse_avahi_output(output);
        assert_eq!(obs.len(), 2);

        let printer = obs.iter().find(|o| o.hostname.as_deref() == Some("printer")).unwrap();
        assert_eq!(printer.ipv4, Some(Ipv4Addr::new(192, 168, 1, 50)));
        assert!(printer.service_tags.contains(&"_ipp._tcp".to_string()));
        assert!(printer.service_tags.contains(&"_http._tcp".to_string()));
        assert_eq!(printer.services[0].port, 631);

        let tv = obs.iter().find(|o| o.hostname.as_deref() == Some("tv")).unwrap();
        assert_eq!(tv.ipv6[0].addr, "fe80::5");
    }

    #[test]
    fn avahi_garbage_is_total() {
        assert!(parse_avahi_output("not;avahi\n=;short\n").is_empty());
    }
}
