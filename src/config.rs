//! Configuration: tuning constants, scan levels, and session options

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::network::subnet::Cidr;

/// Capacity of the observation channel between drivers and the correlator.
pub const OBSERVATION_CHANNEL_CAPACITY: usize = 1000;

/// Per-subscriber event buffer; overflow drops oldest events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Live hosts scanned concurrently during the deep-scan phase.
pub const SCAN_BATCH_SIZE: usize = 15;

/// How long a cancelled driver gets to release its resources.
pub const DRIVER_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Merge-tick cadence during passive monitoring.
pub const MONITOR_MERGE_TICK: Duration = Duration::from_secs(5);

/// Usage categories below this confidence stay unset.
pub const USAGE_CONFIDENCE_THRESHOLD: u8 = 30;

/// Listen window for the service-discovery phase drivers.
pub const SERVICE_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(4);

/// Workgroup names probed by the NetBIOS broadcast pass.
pub const NETBIOS_WORKGROUPS: &[&str] = &["WORKGROUP", "MSHOME", "HOME"];

/// Service types queried by the mDNS driver's pure fallback.
pub const MDNS_SERVICE_TYPES: &[&str] = &[
    "_services._dns-sd._udp.local",
    "_http._tcp.local",
    "_ipp._tcp.local",
    "_printer._tcp.local",
    "_airplay._tcp.local",
    "_raop._tcp.local",
    "_googlecast._tcp.local",
    "_smb._tcp.local",
    "_ssh._tcp.local",
    "_hap._tcp.local",
    "_workstation._tcp.local",
];

/// Breadth/depth preset for the active port scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanLevel {
    Quick,
    Standard,
    Thorough,
}

impl ScanLevel {
    /// Accepts the documented aliases; "fast" means quick.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.to_lowercase().as_str() {
            "quick" | "fast" => Ok(ScanLevel::Quick),
            "standard" => Ok(ScanLevel::Standard),
            "thorough" => Ok(ScanLevel::Thorough),
            other => Err(anyhow!(
                "Unknown scan level '{}'. Expected quick, standard, or thorough.",
                other
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanLevel::Quick => "quick",
            ScanLevel::Standard => "standard",
            ScanLevel::Thorough => "thorough",
        }
    }

    /// The knob record consulted by the scanner driver. Levels are
    /// configuration, not code paths.
    pub fn knobs(&self) -> ScanLevelKnobs {
        match self {
            ScanLevel::Quick => ScanLevelKnobs {
                ports: PortSelection::Fixed(&[22, 80, 443]),
                version_probe: VersionProbe::Light,
                os_detection: OsDetection::Off,
                host_timeout: Duration::from_secs(10),
                phase_floor: Duration::from_secs(5),
            },
            ScanLevel::Standard => ScanLevelKnobs {
                ports: PortSelection::Fixed(COMMON_PORTS),
                version_probe: VersionProbe::Medium,
                os_detection: OsDetection::On,
                host_timeout: Duration::from_secs(30),
                phase_floor: Duration::from_secs(30),
            },
            ScanLevel::Thorough => ScanLevelKnobs {
                ports: PortSelection::TopPorts(1000),
                version_probe: VersionProbe::Heavy,
                os_detection: OsDetection::WithGuess,
                host_timeout: Duration::from_secs(90),
                phase_floor: Duration::from_secs(90),
            },
        }
    }
}

impl std::fmt::Display for ScanLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ~20 common ports for the standard level.
const COMMON_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 135, 139, 143, 443, 445, 515, 631, 993, 3306, 3389, 5900, 8080,
    9100,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSelection {
    Fixed(&'static [u16]),
    TopPorts(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionProbe {
    Light,
    Medium,
    Heavy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsDetection {
    Off,
    On,
    WithGuess,
}

/// Knobs consulted by the active-scanner driver for one level.
#[derive(Debug, Clone, Copy)]
pub struct ScanLevelKnobs {
    pub ports: PortSelection,
    pub version_probe: VersionProbe,
    pub os_detection: OsDetection,
    pub host_timeout: Duration,
    /// Minimum deadline for phases run at this level.
    pub phase_floor: Duration,
}

/// Output shape requested for the final snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Csv,
    Table,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "table" => Ok(OutputFormat::Table),
            other => Err(anyhow!(
                "Unknown output format '{}'. Expected json, csv, or table.",
                other
            )),
        }
    }
}

/// Session options, assembled from config file and flags.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub target: Option<Cidr>,
    pub interface: Option<String>,
    pub passive: bool,
    pub watch: bool,
    pub output: Option<PathBuf>,
    pub format: OutputFormat,
    pub verbose: bool,
    pub os_detection: bool,
    pub level: ScanLevel,
    /// Per-host timeout override (seconds); level default when unset.
    pub host_timeout: Option<u64>,
    pub ipv6: bool,
    /// Overall session deadline for non-watch runs (seconds).
    pub session_timeout: Option<u64>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            target: None,
            interface: None,
            passive: false,
            watch: false,
            output: None,
            format: OutputFormat::Table,
            verbose: false,
            os_detection: true,
            level: ScanLevel::Standard,
            host_timeout: None,
            ipv6: true,
            session_timeout: None,
        }
    }
}

impl ScanOptions {
    /// Effective per-host timeout for the deep-scan phase.
    pub fn effective_host_timeout(&self) -> Duration {
        self.host_timeout
            .map(Duration::from_secs)
            .unwrap_or(self.level.knobs().host_timeout)
    }

    /// Per-phase deadline: session timeout when configured, with the
    /// level's floor applied.
    pub fn phase_deadline(&self) -> Duration {
        let floor = self.level.knobs().phase_floor;
        match self.session_timeout {
            Some(secs) => Duration::from_secs(secs).max(floor),
            None => floor.max(Duration::from_secs(30)),
        }
    }
}

/// Optional configuration file. Keys mirror the flags; flags win.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ConfigFile {
    pub target: Option<String>,
    pub interface: Option<String>,
    pub passive: Option<bool>,
    pub watch: Option<bool>,
    pub output: Option<String>,
    pub format: Option<String>,
    pub verbose: Option<bool>,
    pub os_detection: Option<bool>,
    pub level: Option<String>,
    pub host_timeout: Option<u64>,
    pub ipv6: Option<bool>,
    pub session_timeout: Option<u64>,
}

/// Location of the user configuration file.
pub fn config_file_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".nscancfg.json"))
}

/// Load the configuration file when present. A malformed file is a
/// warning, not a fatal: defaults apply.
pub fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return ConfigFile::default();
    };
    match serde_json::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("ignoring malformed {}: {}", path.display(), e);
            ConfigFile::default()
        }
    }
}

impl ScanOptions {
    /// Overlay config-file values onto defaults. Flags are applied on top
    /// by the CLI layer afterwards.
    pub fn from_config_file(file: &ConfigFile) -> Self {
        let mut opts = Self::default();
        if let Some(target) = &file.target
            && let Ok(cidr) = target.parse()
        {
            opts.target = Some(cidr);
        }
        opts.interface = file.interface.clone();
        if let Some(v) = file.passive {
            opts.passive = v;
        }
        if let Some(v) = file.watch {
            opts.watch = v;
        }
        opts.output = file.output.clone().map(PathBuf::from);
        if let Some(format) = &file.format
            && let Ok(parsed) = OutputFormat::parse(format)
        {
            opts.format = parsed;
        }
        if let Some(v) = file.verbose {
            opts.verbose = v;
        }
        if let Some(v) = file.os_detection {
            opts.os_detection = v;
        }
        if let Some(level) = &file.level
            && let Ok(parsed) = ScanLevel::parse(level)
        {
            opts.level = parsed;
        }
        opts.host_timeout = file.host_timeout;
        if let Some(v) = file.ipv6 {
            opts.ipv6 = v;
        }
        opts.session_timeout = file.session_timeout;
        opts
    }
}
