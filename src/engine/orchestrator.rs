//! Phase orchestration
//!
//! Drives the discovery drivers through the phase state machine:
//!
//! ```text
//! IDLE -> INIT -> PHASE0 -> PHASE1 -> PHASE2 -> (PHASE3 | COMPLETE)
//!                                     ^ skipped at quick level / passive
//!                                                PHASE3 only in watch mode
//! ```
//!
//! Each phase launches drivers under their own cancellation flags and a
//! per-phase deadline. A driver exceeding its deadline is cancelled alone;
//! partial results are retained. Observations flow into the correlator
//! throughout.

use anyhow::{Result, anyhow};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{
    DRIVER_GRACE_PERIOD, MONITOR_MERGE_TICK, OBSERVATION_CHANNEL_CAPACITY, ScanLevel,
    ScanOptions, SERVICE_DISCOVERY_TIMEOUT,
};
use crate::drivers::{self, CancelFlag, tool_available};
use crate::engine::correlator::spawn_correlator;
use crate::engine::events::{EventBus, ScanEvent, ScanPhase};
use crate::models::{DeviceRecord, ScanStats};
use crate::network::interface::{InterfaceInfo, find_interface, primary_interface};

/// Session orchestrator. One instance runs one scan.
pub struct Orchestrator {
    opts: ScanOptions,
    events: EventBus,
    stop: CancelFlag,
}

impl Orchestrator {
    pub fn new(opts: ScanOptions, events: EventBus) -> Self {
        Self {
            opts,
            events,
            stop: CancelFlag::new(),
        }
    }

    /// Flag that stops the session from outside (ctrl-c, watch-mode exit).
    pub fn stop_flag(&self) -> CancelFlag {
        self.stop.clone()
    }

    /// Run the scan to completion. Fatal initialisation errors surface as
    /// both a `ScanError` event and the returned error.
    pub async fn run(self) -> Result<(Vec<DeviceRecord>, ScanStats)> {
        match self.run_inner().await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.events.emit(ScanEvent::ScanError {
                    message: format!("{:#}", e),
                });
                self.events.emit(ScanEvent::ScanPhaseChange {
                    phase: ScanPhase::Failed,
                    name: ScanPhase::Failed.name().to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_inner(&self) -> Result<(Vec<DeviceRecord>, ScanStats)> {
        let started = Instant::now();

        // INIT ---------------------------------------------------------
        self.phase(ScanPhase::Init);
        let interface = self.resolve_interface()?;
        let cidr = self.opts.target.or(interface.cidr);
        self.check_tools()?;

        self.events.emit(ScanEvent::ScanStarted {
            target: cidr.map(|c| c.to_string()),
            interface: Some(interface.name.clone()),
            level: self.opts.level.to_string(),
        });
        let enabled = drivers::DriverKind::enabled(&self.opts);
        tracing::info!(
            "scan started on {} (target {:?}, level {}, drivers: {})",
            interface.name,
            cidr.map(|c| c.to_string()),
            self.opts.level,
            enabled
                .iter()
                .map(|k| k.name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let (obs_tx, obs_rx) = mpsc::channel(OBSERVATION_CHANNEL_CAPACITY);
        let (correlator, correlator_task) = spawn_correlator(obs_rx, self.events.clone());
        let mut driver_flags: Vec<CancelFlag> = Vec::new();

        // PHASE0: passive service discovery ----------------------------
        if !self.stop.is_cancelled() {
            self.phase(ScanPhase::ServiceDiscovery);
            let window = SERVICE_DISCOVERY_TIMEOUT.min(self.opts.phase_deadline());
            let flag = self.driver_flag(&mut driver_flags);

            let mdns = tokio::spawn(drivers::mdns::run_mdns(
                obs_tx.clone(),
                flag.clone(),
                window,
                self.opts.ipv6,
            ));
            let ssdp = tokio::spawn(drivers::ssdp::run_ssdp(
                obs_tx.clone(),
                flag.clone(),
                window,
                self.opts.ipv6,
            ));
            self.await_phase(vec![mdns, ssdp], &flag, window + Duration::from_secs(2))
                .await;
        }

        // PHASE1: fast discovery ---------------------------------------
        let capture_flag = CancelFlag::new();
        let mut capture_task: Option<JoinHandle<()>> = None;
        if !self.stop.is_cancelled() {
            self.phase(ScanPhase::FastDiscovery);
            driver_flags.push(capture_flag.clone());

            // The capture driver is left running: it continues into the
            // monitoring phase or is cancelled at completion.
            capture_task = Some(tokio::spawn(drivers::capture::run_capture(
                obs_tx.clone(),
                capture_flag.clone(),
                Some(interface.name.clone()),
                None,
            )));

            let deadline = self.opts.phase_deadline();
            let flag = self.driver_flag(&mut driver_flags);
            let arp = tokio::spawn(drivers::neigh::run_arp_table(
                obs_tx.clone(),
                flag.clone(),
            ));
            let ndp_iface = self.opts.ipv6.then(|| interface.name.clone());
            let ndp = tokio::spawn(drivers::neigh::run_ndp_table(
                obs_tx.clone(),
                flag.clone(),
                ndp_iface,
            ));
            self.await_phase(vec![arp, ndp], &flag, deadline).await;

            // NetBIOS per-IP resolution on hostname-less records, then a
            // broadcast pass.
            if !self.stop.is_cancelled() {
                let pending = correlator.hostname_less_ipv4().await;
                let flag = self.driver_flag(&mut driver_flags);
                let per_ip = tokio::spawn(drivers::netbios::run_netbios_lookup(
                    obs_tx.clone(),
                    flag.clone(),
                    pending,
                ));
                let broadcast = tokio::spawn(drivers::netbios::run_netbios_broadcast(
                    obs_tx.clone(),
                    flag.clone(),
                ));
                self.await_phase(vec![per_ip, broadcast], &flag, deadline).await;
            }

            // Reverse DNS for anything still nameless.
            if !self.stop.is_cancelled() {
                let pending = correlator.hostname_less_ipv4().await;
                let resolved = crate::network::dns::resolve_hostnames(&pending).await;
                let _ = drivers::emit_all(&obs_tx, resolved).await;
            }
        }

        // PHASE2: deep scan --------------------------------------------
        let deep_scan = !self.opts.passive && self.opts.level != ScanLevel::Quick;
        if deep_scan && !self.stop.is_cancelled() {
            self.phase(ScanPhase::DeepScan);
            let ipv6_targets = if self.opts.ipv6 {
                correlator.ipv6_targets().await
            } else {
                Vec::new()
            };

            if cidr.is_none() && ipv6_targets.is_empty() {
                tracing::warn!("no target range derivable; skipping deep scan");
            } else {
                let targets = drivers::portscan::ScanTargets {
                    cidr,
                    ipv6: ipv6_targets,
                };
                let flag = self.driver_flag(&mut driver_flags);
                let events = self.events.clone();
                let scan = tokio::spawn(drivers::portscan::run_port_scan(
                    obs_tx.clone(),
                    flag.clone(),
                    targets,
                    self.opts.level.knobs(),
                    self.opts.effective_host_timeout(),
                    self.opts.os_detection,
                    move |scanned, total| {
                        events.emit(ScanEvent::ScanProgress {
                            phase: ScanPhase::DeepScan,
                            scanned,
                            total,
                            message: format!("scanned {}/{} hosts", scanned, total),
                        });
                    },
                ));
                // The deep scan budget scales with the batch count rather
                // than the bare phase floor.
                let budget = self
                    .opts
                    .phase_deadline()
                    .max(self.opts.effective_host_timeout() * 4);
                self.await_phase(vec![scan], &flag, budget).await;
            }
        }

        // PHASE3: passive monitoring -----------------------------------
        if self.opts.watch && !self.stop.is_cancelled() {
            self.phase(ScanPhase::Monitor);
            loop {
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    _ = tokio::time::sleep(MONITOR_MERGE_TICK) => {
                        let stats = correlator.stats().await;
                        self.events.emit(ScanEvent::ScanProgress {
                            phase: ScanPhase::Monitor,
                            scanned: stats.devices,
                            total: stats.devices,
                            message: format!(
                                "{} devices, {} observations",
                                stats.devices, stats.observations
                            ),
                        });
                    }
                }
            }
        }

        // COMPLETE ------------------------------------------------------
        self.phase(ScanPhase::Complete);
        for flag in &driver_flags {
            flag.cancel();
        }
        if let Some(task) = capture_task {
            grace_await(task).await;
        }

        // Close the channel so the correlator drains in-flight
        // observations and settles.
        drop(obs_tx);

        let devices = correlator.snapshot().await;
        let mut stats = correlator.stats().await;
        stats.duration_ms = started.elapsed().as_millis() as u64;

        self.events.emit(ScanEvent::ScanCompleted {
            devices: devices.clone(),
            stats: stats.clone(),
        });

        drop(correlator);
        let _ = correlator_task.await;
        // Settle the stop-propagation tasks spawned per driver flag.
        self.stop.cancel();

        tracing::info!(
            "scan complete: {} devices from {} observations in {}ms",
            stats.devices,
            stats.observations,
            stats.duration_ms
        );
        Ok((devices, stats))
    }

    fn phase(&self, phase: ScanPhase) {
        tracing::debug!("entering phase: {}", phase.name());
        self.events.emit(ScanEvent::ScanPhaseChange {
            phase,
            name: phase.name().to_string(),
        });
    }

    /// New per-phase driver flag, pre-linked to the session stop signal.
    fn driver_flag(&self, flags: &mut Vec<CancelFlag>) -> CancelFlag {
        let flag = CancelFlag::new();
        flags.push(flag.clone());
        let stop = self.stop.clone();
        let linked = flag.clone();
        tokio::spawn(async move {
            stop.cancelled().await;
            linked.cancel();
        });
        flag
    }

    /// Await a phase's driver tasks up to `deadline`; expiry cancels the
    /// phase flag and grants the grace period.
    async fn await_phase(
        &self,
        tasks: Vec<JoinHandle<()>>,
        flag: &CancelFlag,
        deadline: Duration,
    ) {
        let all = async {
            for task in tasks {
                if let Err(e) = task.await
                    && !e.is_cancelled()
                {
                    tracing::warn!("driver task failed: {}", e);
                }
            }
        };

        if tokio::time::timeout(deadline, all).await.is_err() {
            tracing::debug!("phase deadline reached; cancelling drivers");
            flag.cancel();
            tokio::time::sleep(DRIVER_GRACE_PERIOD).await;
        }
    }

    fn resolve_interface(&self) -> Result<InterfaceInfo> {
        match &self.opts.interface {
            Some(name) => find_interface(name),
            None => primary_interface(),
        }
    }

    /// Tool availability policy: the active scanner is required beyond
    /// quick level, everything else degrades with a warning.
    fn check_tools(&self) -> Result<()> {
        let active = !self.opts.passive && self.opts.level != ScanLevel::Quick;
        if active && !tool_available("nmap") {
            return Err(anyhow!(
                "The active port scanner (nmap) is required at the {} scan level.\n\
                 Install it (e.g. 'apt install nmap' on Debian/Ubuntu,\n\
                 'brew install nmap' on macOS) or run with --level quick / --passive.",
                self.opts.level
            ));
        }

        if active && self.opts.os_detection && !is_root::is_root() {
            return Err(anyhow!(
                "OS detection requires elevated privileges.\n\
                 Run with sudo (or as Administrator on Windows), or pass\n\
                 --no-os-detection / --passive to scan without it."
            ));
        }
        if !tool_available("tcpdump") {
            tracing::warn!("packet sniffer (tcpdump) not found; passive capture disabled");
        }
        if !cfg!(target_os = "windows") && !tool_available("nmblookup") {
            tracing::warn!("NetBIOS tool (nmblookup) not found; NetBIOS discovery disabled");
        }
        Ok(())
    }
}

/// Await a long-running driver within the grace period, aborting it when
/// it overstays.
async fn grace_await(mut task: JoinHandle<()>) {
    if tokio::time::timeout(DRIVER_GRACE_PERIOD, &mut task).await.is_err() {
        task.abort();
        tracing::debug!("driver exceeded the shutdown grace period; aborted");
    }
}
