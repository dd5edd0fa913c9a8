//! Reverse DNS hostname resolution
//!
//! Enrichment pass for records that end a discovery phase without a
//! hostname. Lookups run in blocking threads with bounded concurrency.

use dns_lookup::lookup_addr;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

use crate::models::{DiscoverySource, Observation};

/// Maximum concurrent reverse lookups.
const MAX_CONCURRENT_DNS: usize = 10;

/// Per-lookup timeout (the resolver call is synchronous).
const DNS_TIMEOUT_MS: u64 = 2000;

/// Reverse-resolve a single address. Results that merely echo the address
/// back are discarded.
pub fn reverse_lookup(ip: Ipv4Addr) -> Option<String> {
    match lookup_addr(&IpAddr::V4(ip)) {
        Ok(hostname) if hostname != ip.to_string() => Some(hostname),
        _ => None,
    }
}

/// Reverse-resolve many addresses concurrently, emitting one hostname
/// observation per successful lookup.
pub async fn resolve_hostnames(ips: &[Ipv4Addr]) -> Vec<Observation> {
    if ips.is_empty() {
        return Vec::new();
    }

    tracing::debug!("reverse DNS pass over {} hosts", ips.len());

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_DNS));
    let results = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for &ip in ips {
        let semaphore = Arc::clone(&semaphore);
        let results = Arc::clone(&results);

        handles.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let lookup = tokio::time::timeout(
                Duration::from_millis(DNS_TIMEOUT_MS),
                tokio::task::spawn_blocking(move || reverse_lookup(ip)),
            )
            .await;

            if let Ok(Ok(Some(hostname))) = lookup {
                let mut obs = Observation::new(DiscoverySource::Dns);
                obs.ipv4 = Some(ip);
                if hostname.contains('.') {
                    obs.fqdn = Some(hostname.clone());
                    obs.hostname = hostname.split('.').next().map(|s| s.to_string());
                } else {
                    obs.hostname = Some(hostname);
                }
                results.lock().await.push(obs);
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!("DNS lookup task failed: {}", e);
        }
    }

    let out = results.lock().await;
    tracing::debug!("reverse DNS pass resolved {} hostnames", out.len());
    out.clone()
}
