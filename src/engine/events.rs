//! Scan event fan-out
//!
//! Broadcast channel of cheap-to-clone snapshots. Observers subscribe
//! independently; a lagging observer loses the oldest events in its own
//! buffer and sees a warning, without ever blocking producers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::EVENT_CHANNEL_CAPACITY;
use crate::models::{DeviceRecord, ScanStats};

/// Orchestrator phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Idle,
    Init,
    ServiceDiscovery,
    FastDiscovery,
    DeepScan,
    Monitor,
    Complete,
    Failed,
}

impl ScanPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Init => "init",
            ScanPhase::ServiceDiscovery => "service discovery",
            ScanPhase::FastDiscovery => "fast discovery",
            ScanPhase::DeepScan => "deep scan",
            ScanPhase::Monitor => "passive monitoring",
            ScanPhase::Complete => "complete",
            ScanPhase::Failed => "failed",
        }
    }
}

/// Events observable by UI and exporter subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ScanEvent {
    ScanStarted {
        target: Option<String>,
        interface: Option<String>,
        level: String,
    },
    ScanPhaseChange {
        phase: ScanPhase,
        name: String,
    },
    ScanProgress {
        phase: ScanPhase,
        scanned: usize,
        total: usize,
        message: String,
    },
    DeviceDiscovered(Box<DeviceRecord>),
    DeviceUpdated(Box<DeviceRecord>),
    DeviceEnriched(Box<DeviceRecord>),
    ScanCompleted {
        devices: Vec<DeviceRecord>,
        stats: ScanStats,
    },
    ScanError {
        message: String,
    },
}

/// Fan-out handle shared by the orchestrator and correlator.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScanEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe a new observer with its own bounded buffer.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all observers. Send errors mean nobody is
    /// listening, which is fine.
    pub fn emit(&self, event: ScanEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive the next event, converting a lagged buffer into a warning.
/// Returns `None` when the bus is closed.
pub async fn next_event(rx: &mut broadcast::Receiver<ScanEvent>) -> Option<ScanEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!("event observer lagged; dropped {} oldest events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
