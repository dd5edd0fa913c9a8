//! SSDP discovery driver
//!
//! Sends an M-SEARCH for `ssdp:all`, then listens for unicast responses
//! and multicast NOTIFY announcements for the configured window. The
//! `server` header feeds OS/model inference; `st`/`nt` feed usage
//! classification.

use anyhow::{Context, Result};
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::drivers::{CancelFlag, ObservationTx, emit_all};
use crate::models::{DiscoverySource, Observation};
use crate::network::ipv6::parse_ipv6;
use crate::parse::ssdp::{SsdpMessage, parse_message};

const SSDP_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const SSDP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc);
const SSDP_PORT: u16 = 1900;

const MSEARCH_V4: &str = "M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 3\r\n\
ST: ssdp:all\r\n\
\r\n";

const MSEARCH_V6: &str = "M-SEARCH * HTTP/1.1\r\n\
HOST: [ff02::c]:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 3\r\n\
ST: ssdp:all\r\n\
\r\n";

/// Run SSDP discovery for `window`.
pub async fn run_ssdp(tx: ObservationTx, cancel: CancelFlag, window: Duration, ipv6: bool) {
    if let Err(e) = search_and_listen(&tx, &cancel, window, ipv6).await
        && !cancel.is_cancelled()
    {
        tracing::warn!("SSDP discovery degraded: {}", e);
    }
}

fn open_v4_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP))
        .context("SSDP v4 socket")?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;
    socket.join_multicast_v4(&SSDP_V4, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into()).context("SSDP v4 socket registration")
}

fn open_v6_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(SockProtocol::UDP))
        .context("SSDP v6 socket")?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_only_v6(true)?;
    socket.bind(&SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0).into())?;
    socket.join_multicast_v6(&SSDP_V6, 0)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into()).context("SSDP v6 socket registration")
}

async fn search_and_listen(
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
                tracing::debug!("SSDP IPv6 listener unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    v4.send_to(
        MSEARCH_V4.as_bytes(),
        SocketAddr::from((SSDP_V4, SSDP_PORT)),
    )
    .await
    .context("M-SEARCH send")?;
    if let Some(v6) = &v6 {
        let _ = v6
            .send_to(MSEARCH_V6.as_bytes(), SocketAddr::from((SSDP_V6, SSDP_PORT)))
            .await;
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
                    handle_datagram(tx, &buf_v4[..len], peer, &mut seen).await;
                }
            }
            received = async {
                match &v6 {
                    Some(socket) => socket.recv_from(&mut buf_v6).await,
                    None => std::future::pending().await,
                }
            } => {
                if let Ok((len, peer)) = received {
                    handle_datagram(tx, &buf_v6[..len], peer, &mut seen).await;
                }
            }
            _ = cancel.cancelled() => break,
            _ = &mut deadline => break,
        }
    }

    Ok(())
}

async fn handle_datagram(
    tx: &ObservationTx,
    buf: &[u8],
    peer: SocketAddr,
    seen: &mut HashSet<String>,
) {
    let text = String::from_utf8_lossy(buf);
    let Some(message) = parse_message(&text) else {
        return;
    };

    // One observation per distinct responder endpoint.
    let key = message
        .usn()
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string());
    if !seen.insert(key) {
        return;
    }

    let _ = emit_all(tx, vec![observation_from(&message, peer)]).await;
}

fn observation_from(message: &SsdpMessage, peer: SocketAddr) -> Observation {
    let mut obs = Observation::new(DiscoverySource::Ssdp);

    match peer.ip() {
        IpAddr::V4(v4) => obs.ipv4 = Some(v4),
        IpAddr::V6(v6) => {
            if let Some(info) = parse_ipv6(&v6.to_string()) {
                obs.ipv6.push(info);
            }
        }
    }

    if let Some(service_type) = message.service_type() {
        obs.service_tags.push(service_type.to_string());
    }
    if let Some(server) = message.server() {
        obs.os_hint = Some(server.to_string());
        obs.model_hint = model_from_server(server);
    }

    obs
}

/// Product token from a `SERVER: OS/ver UPnP/1.1 product/ver` header.
fn model_from_server(server: &str) -> Option<String> {
    server
        .split_whitespace()
        .filter(|token| !token.to_lowercase().starts_with("upnp/"))
        .next_back()
        .map(|token| token.replace('/', " "))
}
