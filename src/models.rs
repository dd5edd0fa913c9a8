//! Data models for the discovery pipeline
//!
//! An [`Observation`] is a single immutable report from one source; the
//! correlator folds observations into canonical [`DeviceRecord`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// Discovery method that produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Arp,
    Ndp,
    PortScan,
    Capture,
    Mdns,
    Ssdp,
    NetBios,
    Dns,
}

impl DiscoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoverySource::Arp => "arp",
            DiscoverySource::Ndp => "ndp",
            DiscoverySource::PortScan => "portscan",
            DiscoverySource::Capture => "capture",
            DiscoverySource::Mdns => "mdns",
            DiscoverySource::Ssdp => "ssdp",
            DiscoverySource::NetBios => "netbios",
            DiscoverySource::Dns => "dns",
        }
    }
}

impl std::fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified kind of an IPv6 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ipv6Kind {
    LinkLocal,
    UniqueLocal,
    Global,
    Multicast,
    Loopback,
    Unknown,
}

/// A single IPv6 address with its classification.
///
/// The textual form is canonical for merging: zone identifier stripped,
/// lower-cased. The zone (when present on the wire) is retained as `scope`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Info {
    pub addr: String,
    pub kind: Ipv6Kind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Transport protocol of a discovered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// An open service on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub port: u16,
    pub protocol: Protocol,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    pub state: String,
}

impl ServiceInfo {
    pub fn open(
        port: u16,
        protocol: Protocol,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            port,
            protocol,
            name: name.into(),
            version: version.into(),
            state: "open".to_string(),
        }
    }
}

/// A single report from one source at one instant. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub source: DiscoverySource,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ipv6: Vec<Ipv6Info>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workgroup: Option<String>,
    /// Manufacturer reported by the source itself (e.g. the scanner's
    /// MAC-line vendor), distinct from OUI-derived enrichment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_hint: Option<String>,
    /// Raw OS string from the source (scanner OS line, SSDP `server` header).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceInfo>,
    /// Service-type tags: mDNS service types, SSDP ST/NT URIs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_tags: Vec<String>,
}

impl Observation {
    /// An empty observation from `source`, stamped now.
    pub fn new(source: DiscoverySource) -> Self {
        Self {
            source,
            timestamp: Utc::now(),
            mac: None,
            ipv4: None,
            ipv6: Vec::new(),
            hostname: None,
            fqdn: None,
            workgroup: None,
            vendor_hint: None,
            os_hint: None,
            model_hint: None,
            ports: Vec::new(),
            services: Vec::new(),
            service_tags: Vec::new(),
        }
    }

    /// True when the observation carries no usable identifier. Such
    /// observations are never stored.
    pub fn is_anonymous(&self) -> bool {
        self.mac.is_none() && self.ipv4.is_none() && self.ipv6.is_empty()
    }
}

/// Inferred usage category for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageCategory {
    RouterGateway,
    Switch,
    AccessPoint,
    Server,
    Workstation,
    Laptop,
    Mobile,
    Iot,
    SmartHome,
    Printer,
    TvMedia,
    Gaming,
    Nas,
    Camera,
    Unknown,
}

impl UsageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageCategory::RouterGateway => "Router/Gateway",
            UsageCategory::Switch => "Switch",
            UsageCategory::AccessPoint => "Access Point",
            UsageCategory::Server => "Server",
            UsageCategory::Workstation => "Computer/Workstation",
            UsageCategory::Laptop => "Laptop",
            UsageCategory::Mobile => "Mobile Device",
            UsageCategory::Iot => "IoT Device",
            UsageCategory::SmartHome => "Smart Home",
            UsageCategory::Printer => "Printer/Scanner",
            UsageCategory::TvMedia => "TV/Media",
            UsageCategory::Gaming => "Gaming Console",
            UsageCategory::Nas => "Storage/NAS",
            UsageCategory::Camera => "Camera",
            UsageCategory::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for UsageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical merged view of one device.
///
/// Invariants (maintained by the correlator):
/// - at least one of `mac` / `ipv4` / `ipv6` is present
/// - `ipv6` entries are distinct under exact textual match (zone stripped)
/// - `first_seen <= last_seen`
/// - `ports` is a superset of every port appearing in `services`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ipv6: Vec<Ipv6Info>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workgroup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// OS family derived by the classifier from the fields below; never
    /// written by merge directly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Raw OS string as reported by a source (scanner OS line, SSDP
    /// `server` header). Evidence for classification, kept separate from
    /// the derived family so a strong string arriving after a weak
    /// hostname or manufacturer guess still reclassifies the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageCategory>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ports: BTreeSet<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceInfo>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub sources: BTreeSet<DiscoverySource>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub discovered_via: BTreeSet<String>,
    /// mDNS service types and SSDP service URIs seen for this device.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub service_tags: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub confidence: u8,
}

impl DeviceRecord {
    /// Create a record from its first observation.
    pub fn from_observation(obs: &Observation) -> Self {
        let mut record = Self {
            mac: None,
            ipv4: None,
            ipv6: Vec::new(),
            hostname: None,
            fqdn: None,
            workgroup: None,
            manufacturer: None,
            os: None,
            os_hint: None,
            os_version: None,
            model: None,
            usage: None,
            ports: BTreeSet::new(),
            services: Vec::new(),
            sources: BTreeSet::new(),
            discovered_via: BTreeSet::new(),
            service_tags: BTreeSet::new(),
            first_seen: obs.timestamp,
            last_seen: obs.timestamp,
            confidence: 0,
        };
        record.merge(obs);
        record
    }

    /// Fold an observation into this record.
    ///
    /// Scalars are first-non-empty-wins; collections grow monotonically;
    /// `last_seen` advances monotonically and `first_seen` never moves.
    pub fn merge(&mut self, obs: &Observation) {
        merge_scalar(&mut self.mac, &obs.mac);
        if self.ipv4.is_none() {
            self.ipv4 = obs.ipv4;
        }
        for info in &obs.ipv6 {
            self.add_ipv6(info.clone());
        }
        merge_scalar(&mut self.hostname, &obs.hostname);
        merge_scalar(&mut self.fqdn, &obs.fqdn);
        merge_scalar(&mut self.workgroup, &obs.workgroup);
        merge_scalar(&mut self.manufacturer, &obs.vendor_hint);
        merge_scalar(&mut self.os_hint, &obs.os_hint);
        merge_scalar(&mut self.model, &obs.model_hint);

        for &port in &obs.ports {
            self.ports.insert(port);
        }
        for service in &obs.services {
            self.add_service(service.clone());
        }
        self.sources.insert(obs.source);
        self.discovered_via.insert(obs.source.as_str().to_string());
        for tag in &obs.service_tags {
            self.service_tags.insert(tag.clone());
        }

        if obs.timestamp > self.last_seen {
            self.last_seen = obs.timestamp;
        }
    }

    /// Absorb another record (used when a late identifier proves two
    /// records describe the same device). Same preference rules as
    /// observation merge.
    pub fn absorb(&mut self, other: DeviceRecord) {
        merge_scalar(&mut self.mac, &other.mac);
        if self.ipv4.is_none() {
            self.ipv4 = other.ipv4;
        }
        for info in other.ipv6 {
            self.add_ipv6(info);
        }
        merge_scalar(&mut self.hostname, &other.hostname);
        merge_scalar(&mut self.fqdn, &other.fqdn);
        merge_scalar(&mut self.workgroup, &other.workgroup);
        merge_scalar(&mut self.manufacturer, &other.manufacturer);
        merge_scalar(&mut self.os, &other.os);
        merge_scalar(&mut self.os_hint, &other.os_hint);
        merge_scalar(&mut self.os_version, &other.os_version);
        merge_scalar(&mut self.model, &other.model);

        for port in other.ports {
            self.ports.insert(port);
        }
        for service in other.services {
            self.add_service(service);
        }
        self.sources.extend(other.sources);
        self.discovered_via.extend(other.discovered_via);
        self.service_tags.extend(other.service_tags);

        if other.first_seen < self.first_seen {
            self.first_seen = other.first_seen;
        }
        if other.last_seen > self.last_seen {
            self.last_seen = other.last_seen;
        }
    }

    /// Insert an IPv6 address, keeping entries distinct by textual address.
    pub fn add_ipv6(&mut self, info: Ipv6Info) {
        if !self.ipv6.iter().any(|existing| existing.addr == info.addr) {
            self.ipv6.push(info);
        }
    }

    /// Append a service, collapsing duplicates on (port, protocol) and
    /// preferring the entry with the longer version string.
    pub fn add_service(&mut self, service: ServiceInfo) {
        self.ports.insert(service.port);
        if let Some(existing) = self
            .services
            .iter_mut()
            .find(|s| s.port == service.port && s.protocol == service.protocol)
        {
            if service.version.len() > existing.version.len() {
                *existing = service;
            }
        } else {
            self.services.push(service);
        }
    }

    /// True when the device is known on both IP families.
    pub fn is_dual_stack(&self) -> bool {
        self.ipv4.is_some() && !self.ipv6.is_empty()
    }

    pub fn has_identifier(&self) -> bool {
        self.mac.is_some() || self.ipv4.is_some() || !self.ipv6.is_empty()
    }
}

/// First-non-empty-wins scalar merge. Empty strings count as absent.
fn merge_scalar(current: &mut Option<String>, incoming: &Option<String>) {
    if current.as_deref().is_none_or(str::is_empty)
        && let Some(value) = incoming
        && !value.is_empty()
    {
        *current = Some(value.clone());
    }
}

/// Aggregate statistics for a completed scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub duration_ms: u64,
    pub observations: u64,
    pub devices: usize,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub observations_by_source: std::collections::BTreeMap<String, u64>,
}
