//! Final-snapshot serialisation
//!
//! JSON and CSV renderings of the device records plus scan statistics,
//! written to a file or stdout.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::models::{DeviceRecord, ScanStats};

#[derive(Serialize)]
struct ScanReport<'a> {
    stats: &'a ScanStats,
    devices: &'a [DeviceRecord],
}

/// Serialise the snapshot as pretty JSON.
pub fn to_json(devices: &[DeviceRecord], stats: &ScanStats) -> Result<String> {
    serde_json::to_string_pretty(&ScanReport { stats, devices }).context("serialising scan report")
}

/// Flat CSV rendering, one row per device.
pub fn to_csv(devices: &[DeviceRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "mac",
        "ipv4",
        "ipv6",
        "hostname",
        "fqdn",
        "workgroup",
        "manufacturer",
        "os",
        "os_version",
        "model",
        "usage",
        "open_ports",
        "sources",
        "first_seen",
        "last_seen",
        "confidence",
    ])?;

    for device in devices {
        let row: Vec<String> = vec![
            device.mac.clone().unwrap_or_default(),
            device.ipv4.map(|ip| ip.to_string()).unwrap_or_default(),
            device
                .ipv6
                .iter()
                .map(|i| i.addr.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            device.hostname.clone().unwrap_or_default(),
            device.fqdn.clone().unwrap_or_default(),
            device.workgroup.clone().unwrap_or_default(),
            device.manufacturer.clone().unwrap_or_default(),
            device.os.clone().unwrap_or_default(),
            device.os_version.clone().unwrap_or_default(),
            device.model.clone().unwrap_or_default(),
            device.usage.map(|u| u.as_str().to_string()).unwrap_or_default(),
            device
                .ports
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            device
                .sources
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            device.first_seen.to_rfc3339(),
            device.last_seen.to_rfc3339(),
            device.confidence.to_string(),
        ];
        writer.write_record(&row)?;
    }

    let bytes = writer.into_inner().context("flushing CSV buffer")?;
    String::from_utf8(bytes).context("CSV output was not UTF-8")
}

/// Write rendered output to a file, or stdout when no path is given.
pub fn write_output(rendered: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("writing {}", path.display())),
        None => {
            println!("{}", rendered);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscoverySource, Observation};
    use std::net::Ipv4Addr;

    fn sample_device() -> DeviceRecord {
        let mut obs = Observation::new(DiscoverySource::Arp);
        obs.mac = Some("AA:BB:CC:DD:EE:01".to_string());
        obs.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 10));
        obs.hostname = Some("host-a".to_string());
        DeviceRecord::from_observation(&obs)
    }

    #[test]
    fn json_report_contains_devices_and_stats() {
        let devices = vec![sample_device()];
        let stats = ScanStats {
            devices: 1,
            observations: 3,
            ..Default::default()
        };
        let json = to_json(&devices, &stats).unwrap();
        assert!(json.contains("\"mac\": \"AA:BB:CC:DD:EE:01\""));
        assert!(json.contains("\"observations\": 3"));
    }

    #[test]
    fn csv_report_has_header_and_row() {
        let csv = to_csv(&[sample_device()]).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("mac,ipv4"));
        let row = lines.next().unwrap();
        assert!(row.contains("AA:BB:CC:DD:EE:01"));
        assert!(row.contains("192.168.1.10"));
        assert!(row.contains("host-a"));
    }
}
