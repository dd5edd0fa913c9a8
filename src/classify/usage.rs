//! Usage-category inference
//!
//! Weighted scoring over a fixed category table. Every category accrues
//! points from manufacturer, hostname, indicator ports, port combinations,
//! OS family, and service-type tags; the best score wins when its
//! confidence clears the threshold.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::models::{DeviceRecord, UsageCategory};

const VENDOR_WEIGHT: u32 = 5;
const HOSTNAME_WEIGHT: u32 = 4;
const PORT_WEIGHT: u32 = 2;
const TAG_WEIGHT: u32 = 6;

struct CategoryRule {
    category: UsageCategory,
    vendors: &'static [&'static str],
    hostname: Option<Regex>,
    ports: &'static [u16],
    /// (ports that must all be present, bonus)
    combos: &'static [(&'static [u16], u32)],
    /// (OS family substring, weight)
    os: &'static [(&'static str, u32)],
    /// Substrings matched against mDNS/SSDP service-type tags.
    tags: &'static [&'static str],
}

fn rules() -> &'static Vec<CategoryRule> {
    static RULES: OnceLock<Vec<CategoryRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let re = |p: &str| Some(Regex::new(p).unwrap());
        vec![
            CategoryRule {
                category: UsageCategory::RouterGateway,
                vendors: &[
                    "cisco", "mikrotik", "tp-link", "netgear", "d-link", "linksys", "ubiquiti",
                    "juniper", "avm", "zyxel",
                ],
                hostname: re(r"(?i)(router|gateway|fritz|openwrt|gw-|rt-)"),
                ports: &[53],
                combos: &[(&[53, 80], 2)],
                os: &[("openwrt", 5), ("routeros", 5)],
                tags: &["internetgatewaydevice", "wanipconnection"],
            },
            CategoryRule {
                category: UsageCategory::Switch,
                vendors: &["aruba", "procurve", "allied telesis", "planet technology"],
                hostname: re(r"(?i)(switch|sw-)"),
                ports: &[],
                combos: &[],
                os: &[],
                tags: &[],
            },
            CategoryRule {
                category: UsageCategory::AccessPoint,
                vendors: &["ruckus", "meraki", "aerohive", "extreme networks"],
                hostname: re(r"(?i)(ap-|accesspoint|unifi|wap-)"),
                ports: &[],
                combos: &[],
                os: &[],
                tags: &[],
            },
            CategoryRule {
                category: UsageCategory::Server,
                vendors: &["supermicro", "vmware", "oracle", "ibm"],
                hostname: re(r"(?i)(server|srv-|web-|db-|mail-|dc-|app-)"),
                ports: &[22, 80, 443, 8080],
                combos: &[(&[80, 443], 2)],
                os: &[("linux", 2), ("bsd", 2)],
                tags: &[],
            },
            CategoryRule {
                category: UsageCategory::Workstation,
                vendors: &["dell", "lenovo", "micro-star", "gigabyte", "intel corporate"],
                hostname: re(r"(?i)(desktop|workstation|-pc\b|^pc-)"),
                ports: &[135, 139, 445, 3389],
                combos: &[(&[3389, 445], 3)],
                os: &[("windows", 3)],
                tags: &[],
            },
            CategoryRule {
                category: UsageCategory::Laptop,
                vendors: &[],
                hostname: re(r"(?i)(laptop|macbook|thinkpad|notebook|surface)"),
                ports: &[],
                combos: &[],
                os: &[("macos", 2)],
                tags: &[],
            },
            CategoryRule {
                category: UsageCategory::Mobile,
                vendors: &[
                    "apple", "samsung", "xiaomi", "huawei", "oneplus", "oppo", "vivo", "motorola",
                ],
                hostname: re(r"(?i)(iphone|ipad|android|galaxy|pixel|redmi|oneplus)"),
                ports: &[62078],
                combos: &[],
                os: &[("ios", 6), ("android", 6)],
                tags: &[],
            },
            CategoryRule {
                category: UsageCategory::Iot,
                vendors: &["espressif", "tuya", "sonoff", "shelly", "particle"],
                hostname: re(r"(?i)(esp[-_0-9]|iot|sensor|tasmota|shelly)"),
                ports: &[],
                combos: &[],
                os: &[("embedded", 4)],
                tags: &[],
            },
            CategoryRule {
                category: UsageCategory::SmartHome,
                vendors: &["philips hue", "signify", "ikea", "ecobee", "ring llc"],
                hostname: re(r"(?i)(hue-?|homekit|nest|echo-|alexa)"),
                ports: &[],
                combos: &[],
                os: &[],
                tags: &["_hap.", "_homekit", "hue-bridge"],
            },
            CategoryRule {
                category: UsageCategory::Printer,
                vendors: &[
                    "canon", "epson", "brother", "xerox", "ricoh", "lexmark", "kyocera",
                ],
                hostname: re(r"(?i)(printer|print-|mfp|laserjet|officejet|envy)"),
                ports: &[515, 631, 9100],
                combos: &[(&[631, 9100], 2)],
                os: &[],
                tags: &["_ipp.", "_ipps.", "_printer.", "_pdl-datastream"],
            },
            CategoryRule {
                category: UsageCategory::TvMedia,
                vendors: &["lg electronics", "tcl", "hisense", "roku", "vizio", "sony"],
                hostname: re(r"(?i)(\btv\b|roku|chromecast|firetv|appletv|bravia|shield)"),
                ports: &[8008, 8009, 32469],
                combos: &[(&[8008, 8009], 2)],
                os: &[],
                tags: &[
                    "_googlecast",
                    "_airplay",
                    "_raop",
                    "dial-multiscreen",
                    "mediarenderer",
                    "mediaserver",
                ],
            },
            CategoryRule {
                category: UsageCategory::Gaming,
                vendors: &["nintendo", "sony interactive"],
                hostname: re(r"(?i)(xbox|playstation|ps4|ps5|nintendo)"),
                ports: &[3074],
                combos: &[],
                os: &[],
                tags: &[],
            },
            CategoryRule {
                category: UsageCategory::Nas,
                vendors: &["synology", "qnap", "western digital", "seagate"],
                hostname: re(r"(?i)(nas|diskstation|storage|freenas|truenas)"),
                ports: &[548, 5000, 5001],
                combos: &[(&[5000, 5001], 2)],
                os: &[],
                tags: &["_afpovertcp", "_smb."],
            },
            CategoryRule {
                category: UsageCategory::Camera,
                vendors: &["hikvision", "dahua", "axis communications", "wyze", "arlo", "reolink"],
                hostname: re(r"(?i)(cam-|camera|ipcam|cctv|nvr|dvr)"),
                ports: &[554, 8554],
                combos: &[],
                os: &[],
                tags: &[],
            },
        ]
    })
}

/// Score every category for a record. Exposed for tests.
pub fn score_categories(record: &DeviceRecord) -> HashMap<UsageCategory, u32> {
    let manufacturer = record
        .manufacturer
        .as_deref()
        .map(str::to_lowercase)
        .unwrap_or_default();
    // Family plus raw hint, so patterns like "openwrt" that only occur in
    // the source string still score.
    let os = [record.os.as_deref(), record.os_hint.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let tags: Vec<String> = record
        .service_tags
        .iter()
        .map(|t| t.to_lowercase())
        .collect();

    let mut scores = HashMap::new();

    for rule in rules() {
        let mut score = 0u32;

        if !manufacturer.is_empty()
            && rule.vendors.iter().any(|v| manufacturer.contains(v))
        {
            score += VENDOR_WEIGHT;
        }

        if let (Some(hostname), Some(re)) = (record.hostname.as_deref(), rule.hostname.as_ref())
            && re.is_match(hostname)
        {
            score += HOSTNAME_WEIGHT;
        }

        for port in rule.ports {
            if record.ports.contains(port) {
                score += PORT_WEIGHT;
            }
        }

        for (combo, bonus) in rule.combos {
            if combo.iter().all(|p| record.ports.contains(p)) {
                score += bonus;
            }
        }

        if !os.is_empty() {
            for (pattern, weight) in rule.os {
                if os.contains(pattern) {
                    score += *weight;
                }
            }
        }

        let matched_tags = rule
            .tags
            .iter()
            .filter(|p| tags.iter().any(|t| t.contains(*p)))
            .count() as u32;
        score += TAG_WEIGHT * matched_tags;

        if score > 0 {
            scores.insert(rule.category, score);
        }
    }

    scores
}

/// Best category with its confidence (`min(100, score * 10)`).
pub fn infer_usage(record: &DeviceRecord) -> Option<(UsageCategory, u8)> {
    let scores = score_categories(record);
    let (category, score) = scores
        .into_iter()
        .max_by_key(|(category, score)| (*score, std::cmp::Reverse(*category)))?;
    let confidence = (score * 10).min(100) as u8;
    Some((category, confidence))
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
    fn windows_host_scores_workstation() {
        let mut record = record_with(|o| {
            o.hostname = Some("DESKTOP-ABC".to_string());
            o.ports = vec![445, 3389];
        });
        record.os = Some("Windows".to_string());

        let (category, confidence) = infer_usage(&record).unwrap();
        assert_eq!(category, UsageCategory::Workstation);
        assert!(confidence > 30);
    }

    #[test]
    fn web_ports_score_server() {
        let record = record_with(|o| {
            o.ports = vec![22, 80, 443];
        });
        let scores = score_categories(&record);
        assert!(scores[&UsageCategory::Server] >= 8);
    }

    #[test]
    fn weak_evidence_yields_low_confidence() {
        let record = record_with(|o| {
            o.ports = vec![53];
        });
        // A single indicator port scores 2 -> confidence 20, under the
        // threshold callers apply.
        let (_, confidence) = infer_usage(&record).unwrap();
        assert!(confidence <= 30);
    }

    #[test]
    fn no_signals_no_category() {
        let record = record_with(|_| {});
        assert!(infer_usage(&record).is_none());
    }

    #[test]
    fn mdns_printer_tag_scores_printer() {
        let record = record_with(|o| {
            o.source = DiscoverySource::Mdns;
            o.hostname = Some("printer".to_string());
            o.service_tags = vec!["_ipp._tcp".to_string()];
        });
        let (category, confidence) = infer_usage(&record).unwrap();
        assert_eq!(category, UsageCategory::Printer);
        assert!(confidence > 30);
    }

    #[test]
    fn chromecast_tags_score_tv() {
        let record = record_with(|o| {
            o.service_tags = vec!["_googlecast._tcp".to_string()];
            o.ports = vec![8009];
        });
        let (category, _) = infer_usage(&record).unwrap();
        assert_eq!(category, UsageCategory::TvMedia);
    }
}
