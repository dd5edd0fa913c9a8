//! Operating-system inference
//!
//! Rule cascade over the evidence present on a record: explicit scanner OS
//! string, then hostname patterns, then port heuristics, then
//! manufacturer. Each rung carries a fixed confidence.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::DeviceRecord;

/// One OS attribution with its confidence and the evidence it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsGuess {
    pub family: String,
    pub version: Option<String>,
    pub confidence: u8,
    pub basis: &'static str,
}

/// Pattern groups for normalising a raw OS string to a family.
const FAMILY_PATTERNS: &[(&str, &str)] = &[
    ("windows", "Windows"),
    ("microsoft", "Windows"),
    ("mac os", "macOS"),
    ("macos", "macOS"),
    ("os x", "macOS"),
    ("darwin", "macOS"),
    ("iphone os", "iOS"),
    ("ios", "iOS"),
    ("ipados", "iOS"),
    ("android", "Android"),
    ("openwrt", "Linux"),
    ("ubuntu", "Linux"),
    ("debian", "Linux"),
    ("fedora", "Linux"),
    ("centos", "Linux"),
    ("raspbian", "Linux"),
    ("linux", "Linux"),
    ("freebsd", "BSD"),
    ("openbsd", "BSD"),
    ("netbsd", "BSD"),
    ("bsd", "BSD"),
    ("lwip", "Embedded"),
    ("rtos", "Embedded"),
    ("vxworks", "Embedded"),
    ("embedded", "Embedded"),
];

fn version_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"[Ww]indows(?:_server)?[ _](?:Server )?(\d+(?:\.\d+)*(?: R2)?)",
            r"(?:Mac OS X|macOS|OS X) (\d+(?:\.\d+)+)",
            r"(?:iOS|iPhone OS|iPadOS) (\d+(?:\.\d+)*)",
            r"[Aa]ndroid[ -](?:dhcp-)?(\d+(?:\.\d+)*)",
            r"(?:Linux|kernel)[ /](\d+(?:\.\d+)+)",
            r"(\d+(?:\.\d+)+)",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

/// Map a raw OS string to a family name.
pub fn family_of(raw: &str) -> Option<&'static str> {
    let lower = raw.to_lowercase();
    FAMILY_PATTERNS
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, family)| *family)
}

/// Extract a version from the original OS string; the first matching
/// pattern wins.
pub fn extract_version(raw: &str) -> Option<String> {
    version_patterns()
        .iter()
        .find_map(|re| re.captures(raw))
        .map(|caps| caps[1].to_string())
}

const HOSTNAME_RULES: &[(&str, &str)] = &[
    ("iphone", "iOS"),
    ("ipad", "iOS"),
    ("android", "Android"),
    ("galaxy", "Android"),
    ("macbook", "macOS"),
    ("imac", "macOS"),
    ("mac", "macOS"),
    ("windows", "Windows"),
    ("desktop-", "Windows"),
    ("-pc", "Windows"),
    ("pc-", "Windows"),
    ("ubuntu", "Linux"),
    ("debian", "Linux"),
    ("raspberrypi", "Linux"),
    ("linux", "Linux"),
];

const MANUFACTURER_RULES: &[(&str, &str)] = &[
    ("apple", "Apple Device"),
    ("microsoft", "Windows"),
    ("raspberry pi", "Linux"),
    ("espressif", "Embedded"),
];

/// Run the detection cascade over the record's current evidence.
///
/// Each rung reads merged evidence fields only, never the derived `os`
/// output, so the result depends on current record state alone and a
/// strong scanner string arriving after a weak guess still wins.
pub fn detect_os(record: &DeviceRecord) -> Option<OsGuess> {
    // 1. Explicit OS string from an active-scanner or SSDP observation.
    if let Some(raw) = &record.os_hint
        && let Some(family) = family_of(raw)
    {
        return Some(OsGuess {
            family: family.to_string(),
            version: extract_version(raw).or_else(|| record.os_version.clone()),
            confidence: 90,
            basis: "scanner",
        });
    }

    // 2. Hostname patterns.
    if let Some(hostname) = &record.hostname {
        let lower = hostname.to_lowercase();
        if let Some((_, family)) = HOSTNAME_RULES.iter().find(|(p, _)| lower.contains(p)) {
            return Some(OsGuess {
                family: family.to_string(),
                version: None,
                confidence: 60,
                basis: "hostname",
            });
        }
    }

    // 3. Port-set heuristics.
    if record.ports.contains(&3389) && record.ports.contains(&445) {
        return Some(OsGuess {
            family: "Windows".to_string(),
            version: None,
            confidence: 50,
            basis: "ports",
        });
    }
    if record.ports.contains(&5353) {
        return Some(OsGuess {
            family: "macOS".to_string(),
            version: None,
            confidence: 50,
            basis: "ports",
        });
    }
    if record.ports.contains(&22) && !record.ports.contains(&3389) {
        return Some(OsGuess {
            family: "Linux".to_string(),
            version: None,
            confidence: 50,
            basis: "ports",
        });
    }

    // 4. Manufacturer fallback.
    if let Some(manufacturer) = &record.manufacturer {
        let lower = manufacturer.to_lowercase();
        if let Some((_, family)) = MANUFACTURER_RULES.iter().find(|(p, _)| lower.contains(p)) {
            return Some(OsGuess {
                family: family.to_string(),
                version: None,
                confidence: 40,
                basis: "manufacturer",
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscoverySource, Observation};
    use std::net::Ipv4Addr;

    fn record_with(f: impl FnOnce(&mut Observation)) -> DeviceRecord {
        let mut obs = Observation::new(DiscoverySource::PortScan);
        obs.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 10));
        f(&mut obs);
        DeviceRecord::from_observation(&obs)
    }

    #[test]
    fn explicit_os_string_wins_with_high_confidence() {
        let record = record_with(|o| o.os_hint = Some("Microsoft Windows 10 1903".to_string()));
        let guess = detect_os(&record).unwrap();
        assert_eq!(guess.family, "Windows");
        assert_eq!(guess.confidence, 90);
        assert_eq!(guess.version.as_deref(), Some("10"));
    }

    #[test]
    fn cpe_strings_normalise() {
        let record = record_with(|o| o.os_hint = Some("cpe:/o:microsoft:windows_10".to_string()));
        let guess = detect_os(&record).unwrap();
        assert_eq!(guess.family, "Windows");
        assert_eq!(guess.version.as_deref(), Some("10"));
    }

    #[test]
    fn hostname_fallback() {
        let record = record_with(|o| o.hostname = Some("Ryans-iPhone".to_string()));
        let guess = detect_os(&record).unwrap();
        assert_eq!(guess.family, "iOS");
        assert_eq!(guess.confidence, 60);
    }

    #[test]
    fn port_heuristics() {
        let windows = record_with(|o| o.ports = vec![3389, 445]);
        assert_eq!(detect_os(&windows).unwrap().family, "Windows");

        let linux = record_with(|o| o.ports = vec![22, 80]);
        assert_eq!(detect_os(&linux).unwrap().family, "Linux");

        let ssh_plus_rdp = record_with(|o| o.ports = vec![22, 3389, 445]);
        assert_eq!(detect_os(&ssh_plus_rdp).unwrap().family, "Windows");
    }

    #[test]
    fn manufacturer_fallback() {
        let record = record_with(|o| o.vendor_hint = Some("Apple, Inc.".to_string()));
        let guess = detect_os(&record).unwrap();
        assert_eq!(guess.family, "Apple Device");
        assert_eq!(guess.confidence, 40);
    }

    #[test]
    fn no_evidence_no_guess() {
        let record = record_with(|_| {});
        assert!(detect_os(&record).is_none());
    }

    #[test]
    fn version_extraction_first_match_wins() {
        assert_eq!(
            extract_version("Mac OS X 10.15.7").as_deref(),
            Some("10.15.7")
        );
        assert_eq!(extract_version("Linux 5.15").as_deref(), Some("5.15"));
        assert_eq!(
            extract_version("Windows Server 2019").as_deref(),
            Some("2019")
        );
        assert_eq!(extract_version("no digits here"), None);
    }
}
