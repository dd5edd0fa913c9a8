//! Active port-scanner driver
//!
//! Two passes: a ping sweep over the target range to enumerate live
//! hosts, then a detailed scan of each live host. Depth is controlled by
//! the scan-level knob record; live hosts are scanned in bounded batches.

use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::{OsDetection, PortSelection, SCAN_BATCH_SIZE, ScanLevelKnobs, VersionProbe};
use crate::drivers::{CancelFlag, ObservationTx, emit_all, run_tool};
use crate::network::subnet::Cidr;
use crate::parse::parse_scan_report;

/// Extra slack on top of the per-host timeout before the child is killed.
const TOOL_SLACK: Duration = Duration::from_secs(10);

/// Targets for one deep-scan pass.
#[derive(Debug, Clone, Default)]
pub struct ScanTargets {
    pub cidr: Option<Cidr>,
    /// IPv6 addresses collected by earlier phases.
    pub ipv6: Vec<String>,
}

/// Run the two-phase scan. `os_detection` gates `-O` regardless of level.
pub async fn run_port_scan(
    tx: ObservationTx,
    cancel: CancelFlag,
    targets: ScanTargets,
    knobs: ScanLevelKnobs,
    host_timeout: Duration,
    os_detection: bool,
    progress: impl Fn(usize, usize) + Send + Sync + 'static,
) {
    let mut hosts: Vec<(String, bool)> = Vec::new(); // (target, is_ipv6)

    if let Some(cidr) = targets.cidr {
        match ping_sweep(&cidr, &cancel).await {
            Ok(live) => {
                tracing::debug!("ping sweep: {} live hosts in {}", live.len(), cidr);
                hosts.extend(live.into_iter().map(|h| (h, false)));
            }
            Err(e) => {
                tracing::warn!("ping sweep failed: {}", e);
            }
        }
    }
    hosts.extend(targets.ipv6.into_iter().map(|h| (h, true)));

    if hosts.is_empty() || cancel.is_cancelled() {
        return;
    }

    let total = hosts.len();
    let progress = Arc::new(progress);
    let semaphore = Arc::new(Semaphore::new(SCAN_BATCH_SIZE));
    let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut handles = Vec::new();

    for (host, is_ipv6) in hosts {
        let tx = tx.clone();
        let cancel = cancel.clone();
        let semaphore = Arc::clone(&semaphore);
        let done = Arc::clone(&done);
        let progress = Arc::clone(&progress);

        handles.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            if cancel.is_cancelled() {
                return;
            }

            let args = detail_args(&host, is_ipv6, &knobs, host_timeout, os_detection);
            let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
            match run_tool("nmap", &arg_refs, host_timeout + TOOL_SLACK, &cancel).await {
                Ok(output) => {
                    let observations = parse_scan_report(&output);
                    if emit_all(&tx, observations).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!("host scan {} failed: {}", host, e);
                }
            }

            let scanned = done.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            progress(scanned, total);
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::debug!("host scan task failed: {}", e);
        }
    }
}

/// `-sn` pass: enumerate live hosts in the range.
async fn ping_sweep(cidr: &Cidr, cancel: &CancelFlag) -> anyhow::Result<Vec<String>> {
    let range = cidr.to_string();
    let output = run_tool(
        "nmap",
        &["-sn", "-n", range.as_str()],
        Duration::from_secs(60),
        cancel,
    )
    .await?;
    Ok(live_hosts(&output))
}

/// Addresses whose report block says the host is up.
fn live_hosts(output: &str) -> Vec<String> {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    let header = HEADER
        .get_or_init(|| Regex::new(r"^Nmap scan report for (?:\S+ \()?([0-9a-fA-F.:]+)\)?").unwrap());

    let mut live = Vec::new();
    let mut pending: Option<String> = None;
    for line in output.lines() {
        if let Some(caps) = header.captures(line) {
            pending = Some(caps[1].to_string());
        } else if line.starts_with("Host is up")
            && let Some(host) = pending.take()
        {
            live.push(host);
        }
    }
    live
}

/// Arguments for the detailed pass on one host.
fn detail_args(
    host: &str,
    is_ipv6: bool,
    knobs: &ScanLevelKnobs,
    host_timeout: Duration,
    os_detection: bool,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    if is_ipv6 {
        args.push("-6".to_string());
    }
    args.push("-n".to_string());

    match knobs.ports {
        PortSelection::Fixed(ports) => {
            let list = ports
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",");
            args.push("-p".to_string());
            args.push(list);
        }
        PortSelection::TopPorts(count) => {
            args.push("--top-ports".to_string());
            args.push(count.to_string());
        }
    }

    args.push("-sV".to_string());
    match knobs.version_probe {
        VersionProbe::Light => {
            args.push("--version-intensity".to_string());
            args.push("2".to_string());
        }
        VersionProbe::Medium => {}
        VersionProbe::Heavy => args.push("--version-all".to_string()),
    }

    if os_detection {
        match knobs.os_detection {
            OsDetection::Off => {}
            OsDetection::On => args.push("-O".to_string()),
            OsDetection::WithGuess => {
                args.push("-O".to_string());
                args.push("--osscan-guess".to_string());
            }
        }
    }

    args.push("--host-timeout".to_string());
    args.push(format!("{}s", host_timeout.as_secs()));
    args.push(host.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanLevel;

    #[test]
    fn live_host_extraction() {
        let output = "\
Starting Nmap
Nmap scan report for 192.168.1.1
Host is up (0.001s latency).
Nmap scan report for 192.168.1.2
Nmap scan report for router.lan (192.168.1.3)
Host is up (0.002s latency).
Nmap done: 256 IP addresses (2 hosts up)
";
        assert_eq!(live_hosts(output), vec!["192.168.1.1", "192.168.1.3"]);
    }

    #[test]
    fn quick_level_args() {
        let knobs = ScanLevel::Quick.knobs();
        let args = detail_args("192.168.1.5", false, &knobs, Duration::from_secs(10), true);
        assert!(args.contains(&"-p".to_string()));
        assert!(args.contains(&"22,80,443".to_string()));
        assert!(args.contains(&"--version-intensity".to_string()));
        assert!(!args.contains(&"-O".to_string()));
        assert!(args.contains(&"10s".to_string()));
    }

    #[test]
    fn thorough_level_args_and_ipv6() {
        let knobs = ScanLevel::Thorough.knobs();
        let args = detail_args("2001:db8::5", true, &knobs, Duration::from_secs(90), true);
        assert_eq!(args[0], "-6");
        assert!(args.contains(&"--top-ports".to_string()));
        assert!(args.contains(&"1000".to_string()));
        assert!(args.contains(&"-O".to_string()));
        assert!(args.contains(&"--osscan-guess".to_string()));
    }

    #[test]
    fn os_detection_flag_gates_dash_o() {
        let knobs = ScanLevel::Standard.knobs();
        let args = detail_args("10.0.0.1", false, &knobs, Duration::from_secs(30), false);
        assert!(!args.contains(&"-O".to_string()));
    }
}
