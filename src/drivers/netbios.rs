//! NetBIOS name-service driver
//!
//! Two variants over the platform name-service tool: a broadcast pass
//! that queries well-known workgroup names and resolves each responder,
//! and a per-IP pass used to enrich records that finished the fast
//! phase without a hostname.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::NETBIOS_WORKGROUPS;
use crate::drivers::{CancelFlag, ObservationTx, emit_all, run_tool, tool_available};
use crate::models::{DiscoverySource, Observation};
use crate::network::mac::normalize_mac;

const TOOL_TIMEOUT: Duration = Duration::from_secs(8);

fn lookup_tool() -> Option<&'static str> {
    if cfg!(target_os = "windows") {
        Some("nbtstat")
    } else if tool_available("nmblookup") {
        Some("nmblookup")
    } else {
        None
    }
}

/// Broadcast pass: query workgroup names, then resolve each responder.
pub async fn run_netbios_broadcast(tx: ObservationTx, cancel: CancelFlag) {
    let Some(tool) = lookup_tool() else {
        tracing::debug!("NetBIOS tool not available; broadcast discovery disabled");
        return;
    };
    if tool == "nbtstat" {
        // nbtstat has no broadcast query form; the per-IP pass covers it.
        return;
    }

    let mut responders: Vec<Ipv4Addr> = Vec::new();
    for workgroup in NETBIOS_WORKGROUPS {
        if cancel.is_cancelled() {
            return;
        }
        match run_tool(tool, &[*workgroup], TOOL_TIMEOUT, &cancel).await {
            Ok(output) => {
                for ip in parse_broadcast_responders(&output) {
                    if !responders.contains(&ip) {
                        responders.push(ip);
                    }
                }
            }
            Err(e) => tracing::debug!("workgroup query {} failed: {}", workgroup, e),
        }
    }

    tracing::debug!("NetBIOS broadcast: {} responders", responders.len());
    resolve_ips(&tx, &cancel, &responders).await;
}

/// Per-IP pass: resolve the NetBIOS computer name and workgroup of known
/// addresses (used on hostname-less records).
pub async fn run_netbios_lookup(tx: ObservationTx, cancel: CancelFlag, ips: Vec<Ipv4Addr>) {
    if lookup_tool().is_none() {
        tracing::debug!("NetBIOS tool not available; per-IP resolution disabled");
        return;
    }
    resolve_ips(&tx, &cancel, &ips).await;
}

async fn resolve_ips(tx: &ObservationTx, cancel: &CancelFlag, ips: &[Ipv4Addr]) {
    let Some(tool) = lookup_tool() else {
        return;
    };

    for &ip in ips {
        if cancel.is_cancelled() {
            return;
        }
        let target = ip.to_string();
        let result = run_tool(tool, &["-A", target.as_str()], TOOL_TIMEOUT, cancel).await;
        match result {
            Ok(output) => {
                if let Some(obs) = parse_name_status(&output, ip)
                    && emit_all(tx, vec![obs]).await.is_err()
                {
                    return;
                }
            }
            Err(e) => tracing::debug!("NetBIOS status of {} failed: {}", ip, e),
        }
    }
}

/// Responder addresses from a broadcast name query:
/// `192.168.1.60 WORKGROUP<00>`.
fn parse_broadcast_responders(output: &str) -> Vec<Ipv4Addr> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|token| token.parse::<Ipv4Addr>().ok())
        .collect()
}

/// Name-status table for one host: computer name from the unique `<00>`
/// (or `<20>`) entry, workgroup from the `<GROUP>` entry, MAC when the
/// tool prints it.
fn parse_name_status(output: &str, ip: Ipv4Addr) -> Option<Observation> {
    let mut hostname: Option<String> = None;
    let mut workgroup: Option<String> = None;
    let mut mac: Option<String> = None;

    for line in output.lines() {
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix("MAC Address =") {
            mac = normalize_mac(rest.trim());
            continue;
        }

        let Some(angle) = trimmed.find('<') else {
            continue;
        };
        let name = trimmed[..angle].trim();
        if name.is_empty() || name.contains(' ') && name.len() > 15 {
            continue;
        }
        let suffix = &trimmed[angle..];
        let is_group = trimmed.contains("<GROUP>") || trimmed.to_uppercase().contains(" GROUP");

        if is_group {
            if workgroup.is_none() && (suffix.starts_with("<00>") || suffix.starts_with("<1d>")) {
                workgroup = Some(name.to_string());
            }
        } else if hostname.is_none()
            && (suffix.starts_with("<00>") || suffix.starts_with("<20>"))
        {
            hostname = Some(name.to_string());
        }
    }

    if hostname.is_none() && workgroup.is_none() {
        return None;
    }

    let mut obs = Observation::new(DiscoverySource::NetBios);
    obs.ipv4 = Some(ip);
    obs.hostname = hostname;
    obs.workgroup = workgroup;
    obs.mac = mac;
    Some(obs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_responders_parsed() {
        let output = "\
querying WORKGROUP on 192.168.1.255
192.168.1.60 WORKGROUP<00>
192.168.1.61 WORKGROUP<00>
";
        assert_eq!(
            parse_broadcast_responders(output),
            vec![
                Ipv4Addr::new(192, 168, 1, 60),
                Ipv4Addr::new(192, 168, 1, 61)
            ]
        );
    }

    #[test]
    fn name_status_extracts_host_group_and_mac() {
        let output = "\
Looking up status of 192.168.1.60
        DESKTOP-ABC     <00> -         B <ACTIVE>
        DESKTOP-ABC     <20> -         B <ACTIVE>
        WORKGROUP       <00> - <GROUP> B <ACTIVE>

        MAC Address = AA-BB-CC-DD-EE-FF
";
        let obs = parse_name_status(output, Ipv4Addr::new(192, 168, 1, 60)).unwrap();
        assert_eq!(obs.hostname.as_deref(), Some("DESKTOP-ABC"));
        assert_eq!(obs.workgroup.as_deref(), Some("WORKGROUP"));
        assert_eq!(obs.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(obs.ipv4, Some(Ipv4Addr::new(192, 168, 1, 60)));
    }

    #[test]
    fn empty_status_yields_nothing() {
        assert!(parse_name_status("No reply from 192.168.1.9\n", Ipv4Addr::new(192, 168, 1, 9)).is_none());
    }
}
