//! Network primitives: addresses, subnets, interfaces, vendor lookup

pub mod dns;
pub mod interface;
pub mod ipv6;
pub mod mac;
pub mod oui;
pub mod subnet;

pub use interface::{InterfaceInfo, find_interface, list_interfaces, primary_interface};
pub use ipv6::{classify_ipv6, parse_ipv6, strip_zone};
pub use mac::{is_broadcast_mac, is_locally_administered, is_multicast_mac, normalize_mac};
pub use oui::resolve_vendor;
pub use subnet::Cidr;
