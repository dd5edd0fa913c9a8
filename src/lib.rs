//! nscan — multi-source LAN device discovery
//!
//! Discovers devices on the attached network and fuses observations from
//! heterogeneous sources into one continuously-updated view:
//! - Link-layer neighbour tables (ARP/NDP)
//! - Active port scanning with OS fingerprinting
//! - Opportunistic packet capture (DHCP, ICMPv6, NetBIOS)
//! - mDNS and SSDP service discovery
//! - NetBIOS name lookups and reverse DNS
//!
//! Observations are merged on unstable, partially-overlapping identifiers
//! (MAC, IPv4, IPv6, hostname) into canonical device records, then
//! enriched with manufacturer, OS, and usage attributions.

pub mod classify;
pub mod config;
pub mod drivers;
pub mod engine;
pub mod export;
pub mod logging;
pub mod models;
pub mod network;
pub mod parse;

pub use config::{ConfigFile, OutputFormat, ScanLevel, ScanOptions, load_config_file};
pub use engine::{
    DeviceStore, EventBus, Orchestrator, ScanEvent, ScanPhase, next_event,
};
pub use models::{
    DeviceRecord, DiscoverySource, Ipv6Info, Ipv6Kind, Observation, Protocol, ScanStats,
    ServiceInfo, UsageCategory,
};
pub use network::{Cidr, InterfaceInfo, list_interfaces, normalize_mac, resolve_vendor};
