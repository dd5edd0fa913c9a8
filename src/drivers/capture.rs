//! Passive packet-capture driver
//!
//! Long-running: streams the sniffer's stdout into the stream parser and
//! emits observations continuously until cancelled or an outer deadline
//! expires. The parser's MAC-to-hostname side index enriches later frames
//! in place; every application surfaces as an ordinary observation.

use anyhow::{Context, Result, anyhow};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::drivers::{CancelFlag, ObservationTx, emit_all, tool_available};
use crate::parse::SnifferParser;

/// BPF filter covering every frame family the parser understands.
const CAPTURE_FILTER: &str = "arp or icmp6 or udp port 67 or udp port 68 or udp port 546 or udp port 547 or udp port 137 or ip or ip6";

/// Run the sniffer until cancellation or `deadline`. A missing sniffer
/// degrades to zero observations.
pub async fn run_capture(
    tx: ObservationTx,
    cancel: CancelFlag,
    interface: Option<String>,
    deadline: Option<Duration>,
) {
    if !tool_available("tcpdump") {
        tracing::debug!("packet sniffer not available; passive capture disabled");
        return;
    }

    if let Err(e) = capture_loop(&tx, &cancel, interface.as_deref(), deadline).await {
        // Cancellation surfaces as an error from the loop; that is the
        // normal shutdown path, everything else is a degradation.
        if !cancel.is_cancelled() {
            tracing::warn!("passive capture stopped: {}", e);
        }
    }
}

async fn capture_loop(
    tx: &ObservationTx,
    cancel: &CancelFlag,
    interface: Option<&str>,
    deadline: Option<Duration>,
) -> Result<()> {
    let mut args: Vec<&str> = vec!["-l", "-n", "-e", "-v"];
    if let Some(iface) = interface {
        args.push("-i");
        args.push(iface);
    }
    args.push(CAPTURE_FILTER);

    let mut child = Command::new("tcpdump")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn tcpdump")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("tcpdump: no stdout pipe"))?;
    let mut reader = BufReader::new(stdout);
    let mut parser = SnifferParser::new();
    let mut chunk = [0u8; 4096];

    let deadline_sleep = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline_sleep);

    loop {
        tokio::select! {
            read = reader.read(&mut chunk) => {
                match read {
                    Ok(0) => break, // sniffer exited
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&chunk[..n]);
                        let observations = parser.push(&text);
                        if emit_all(tx, observations).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("sniffer read error: {}", e);
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => {
                break;
            }
            _ = &mut deadline_sleep => {
                tracing::debug!("passive capture deadline reached");
                break;
            }
        }
    }

    // Kill promptly rather than waiting for kill_on_drop.
    let _ = child.start_kill();
    let _ = child.wait().await;
    Ok(())
}
