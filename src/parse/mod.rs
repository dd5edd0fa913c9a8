//! Text and wire parsers for the discovery sources
//!
//! Parsers are pure: bytes in, observations out, no I/O. They are total
//! over malformed input.

pub mod mdns;
pub mod neigh;
pub mod portscan;
pub mod sniffer;
pub mod ssdp;

pub use neigh::{parse_arp_table, parse_ndp_table};
pub use portscan::parse_scan_report;
pub use sniffer::SnifferParser;
