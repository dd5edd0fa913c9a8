//! Discovery source drivers
//!
//! One driver per discovery method. Every driver is a bounded async task
//! that emits observations into the shared channel and honours the same
//! contract: run to completion or until cancelled, release child
//! processes and sockets promptly, and degrade to zero observations when
//! its tool is missing.

pub mod capture;
pub mod mdns;
pub mod neigh;
pub mod netbios;
pub mod portscan;
pub mod ssdp;

use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{Notify, mpsc};

use crate::models::Observation;

/// Sender half of the driver -> correlator channel.
pub type ObservationTx = mpsc::Sender<Observation>;

/// Driver kinds the orchestrator can enable per configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    Arp,
    Ndp,
    PortScan,
    Capture,
    Mdns,
    Ssdp,
    NetBios,
}

impl DriverKind {
    pub fn name(&self) -> &'static str {
        match self {
            DriverKind::Arp => "arp",
            DriverKind::Ndp => "ndp",
            DriverKind::PortScan => "portscan",
            DriverKind::Capture => "capture",
            DriverKind::Mdns => "mdns",
            DriverKind::Ssdp => "ssdp",
            DriverKind::NetBios => "netbios",
        }
    }

    /// Drivers a session will launch under the given options.
    pub fn enabled(opts: &crate::config::ScanOptions) -> Vec<DriverKind> {
        let mut kinds = vec![DriverKind::Mdns, DriverKind::Ssdp, DriverKind::Arp];
        if opts.ipv6 {
            kinds.push(DriverKind::Ndp);
        }
        if tool_available("tcpdump") {
            kinds.push(DriverKind::Capture);
        }
        if cfg!(target_os = "windows") || tool_available("nmblookup") {
            kinds.push(DriverKind::NetBios);
        }
        if !opts.passive && opts.level != crate::config::ScanLevel::Quick {
            kinds.push(DriverKind::PortScan);
        }
        kinds
    }
}

struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Idempotent cancellation flag shared between the orchestrator and one
/// driver (or a group of drivers).
#[derive(Clone)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation. Safe to call any number of times.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is signalled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Check whether an external tool is reachable through PATH.
pub fn tool_available(name: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| {
        let candidate = dir.join(name);
        candidate.is_file() || has_exe_sibling(&candidate)
    })
}

#[cfg(windows)]
fn has_exe_sibling(candidate: &Path) -> bool {
    candidate.with_extension("exe").is_file()
}

#[cfg(not(windows))]
fn has_exe_sibling(_candidate: &Path) -> bool {
    false
}

/// Run an external tool to completion, honouring cancellation and a
/// timeout. The child is killed on either; partial output is not
/// recovered (one-shot tools produce all-or-nothing reads).
pub async fn run_tool(
    program: &str,
    args: &[&str],
    timeout: Duration,
    cancel: &CancelFlag,
) -> Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {}", program))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("{}: no stdout pipe", program))?;

    let read_all = async {
        use tokio::io::AsyncReadExt;
        let mut buf = String::new();
        let mut reader = tokio::io::BufReader::new(stdout);
        reader.read_to_string(&mut buf).await?;
        let status = child.wait().await?;
        Ok::<(String, std::process::ExitStatus), anyhow::Error>((buf, status))
    };

    tokio::select! {
        result = tokio::time::timeout(timeout, read_all) => {
            let (output, _status) = result
                .map_err(|_| anyhow!("{} timed out after {:?}", program, timeout))??;
            Ok(output)
        }
        _ = cancel.cancelled() => {
            Err(anyhow!("{} cancelled", program))
        }
    }
}

/// Send an observation batch, stopping early if the correlator is gone.
pub async fn emit_all(tx: &ObservationTx, observations: Vec<Observation>) -> Result<()> {
    for obs in observations {
        tx.send(obs)
            .await
            .map_err(|_| anyhow!("observation channel closed"))?;
    }
    Ok(())
}
