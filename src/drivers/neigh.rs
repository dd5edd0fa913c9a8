//! Neighbour-table drivers (ARP and NDP)
//!
//! One-shot reads of the platform neighbour tables. The NDP pass first
//! nudges the cache with an ICMPv6 echo to the all-nodes multicast group
//! so recently-quiet neighbours reappear.

use std::time::Duration;

use crate::drivers::{CancelFlag, ObservationTx, emit_all, run_tool, tool_available};
use crate::parse::{parse_arp_table, parse_ndp_table};

const TOOL_TIMEOUT: Duration = Duration::from_secs(5);

/// Read the IPv4 neighbour table. Missing tools are a degradation, not an
/// error: the driver completes with zero observations.
pub async fn run_arp_table(tx: ObservationTx, cancel: CancelFlag) {
    let output = if cfg!(target_os = "windows") {
        run_tool("arp", &["-a"], TOOL_TIMEOUT, &cancel).await
    } else if tool_available("ip") {
        run_tool("ip", &["neigh", "show"], TOOL_TIMEOUT, &cancel).await
    } else {
        run_tool("arp", &["-a"], TOOL_TIMEOUT, &cancel).await
    };

    let observations = match output {
        Ok(text) => parse_arp_table(&text),
        Err(e) => {
            tracing::debug!("ARP table read unavailable: {}", e);
            return;
        }
    };

    tracing::debug!("ARP table yielded {} entries", observations.len());
    if emit_all(&tx, observations).await.is_err() {
        tracing::debug!("ARP driver: correlator gone, stopping");
    }
}

/// Read the IPv6 neighbour table, pre-warming the cache via a multicast
/// echo on the selected interface.
pub async fn run_ndp_table(tx: ObservationTx, cancel: CancelFlag, interface: Option<String>) {
    if let Some(iface) = &interface {
        ping_all_nodes(iface, &cancel).await;
    }

    let output = if cfg!(target_os = "windows") {
        run_tool("netsh", &["interface", "ipv6", "show", "neighbors"], TOOL_TIMEOUT, &cancel)
            .await
    } else if tool_available("ip") {
        run_tool("ip", &["-6", "neigh", "show"], TOOL_TIMEOUT, &cancel).await
    } else {
        run_tool("ndp", &["-an"], TOOL_TIMEOUT, &cancel).await
    };

    let observations = match output {
        Ok(text) => parse_ndp_table(&text),
        Err(e) => {
            tracing::debug!("NDP table read unavailable: {}", e);
            return;
        }
    };

    tracing::debug!("NDP table yielded {} entries", observations.len());
    if emit_all(&tx, observations).await.is_err() {
        tracing::debug!("NDP driver: correlator gone, stopping");
    }
}

/// Best-effort ICMPv6 echo to `ff02::1` to populate the neighbour cache.
/// Any failure is ignored.
async fn ping_all_nodes(interface: &str, cancel: &CancelFlag) {
    let target = format!("ff02::1%{}", interface);
    let result = if cfg!(target_os = "macos") {
        run_tool(
            "ping6",
            &["-c", "2", target.as_str()],
            Duration::from_secs(3),
            cancel,
        )
        .await
    } else {
        run_tool(
            "ping",
            &["-6", "-c", "2", "-W", "1", target.as_str()],
            Duration::from_secs(3),
            cancel,
        )
        .await
    };
    if let Err(e) = result {
        tracing::debug!("all-nodes echo skipped: {}", e);
    }
}
