//! Scan engine: correlation, events, and phase orchestration

pub mod correlator;
pub mod events;
pub mod orchestrator;

pub use correlator::{CorrelatorHandle, DeviceStore, IngestOutcome, spawn_correlator};
pub use events::{EventBus, ScanEvent, ScanPhase, next_event};
pub use orchestrator::Orchestrator;
