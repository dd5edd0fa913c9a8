//! IPv6 address validation, zone handling, and classification

use crate::models::{Ipv6Info, Ipv6Kind};

/// Split a textual IPv6 address into (address, zone identifier).
pub fn strip_zone(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('%') {
        Some((addr, zone)) if !zone.is_empty() => (addr, Some(zone)),
        Some((addr, _)) => (addr, None),
        None => (raw, None),
    }
}

/// Syntactic validity: full 8-group form, compressed with at most one `::`,
/// the empty `::`, or `::1`. The zone identifier must be stripped first.
pub fn is_valid_ipv6(addr: &str) -> bool {
    if addr.is_empty() {
        return false;
    }
    // At most one "::".
    let double_count = addr.matches("::").count();
    if double_count > 1 {
        return false;
    }
    if addr.contains(":::") {
        return false;
    }

    let groups: Vec<&str> = addr.split(':').collect();
    let non_empty: Vec<&str> = groups.iter().copied().filter(|g| !g.is_empty()).collect();

    if double_count == 0 && non_empty.len() != 8 {
        return false;
    }
    if double_count == 1 && non_empty.len() >= 8 {
        return false;
    }
    // A single leading or trailing ':' without compression is malformed.
    if double_count == 0 && groups.iter().any(|g| g.is_empty()) {
        return false;
    }

    non_empty
        .iter()
        .all(|g| g.len() <= 4 && g.chars().all(|c| c.is_ascii_hexdigit()))
}

/// First 16-bit group of the (possibly compressed) address, or 0 when the
/// address starts with `::`.
fn leading_group(addr: &str) -> Option<u16> {
    if addr.starts_with("::") {
        return Some(0);
    }
    let first = addr.split(':').next()?;
    u16::from_str_radix(first, 16).ok()
}

/// Classify a zone-stripped IPv6 address by its leading bits.
pub fn classify_ipv6(addr: &str) -> Ipv6Kind {
    if !is_valid_ipv6(addr) {
        return Ipv6Kind::Unknown;
    }
    if addr == "::1" {
        return Ipv6Kind::Loopback;
    }
    let Some(group) = leading_group(addr) else {
        return Ipv6Kind::Unknown;
    };
    if group & 0xffc0 == 0xfe80 {
        Ipv6Kind::LinkLocal
    } else if group & 0xfe00 == 0xfc00 {
        Ipv6Kind::UniqueLocal
    } else if group & 0xff00 == 0xff00 {
        Ipv6Kind::Multicast
    } else if (0x2000..=0x3fff).contains(&group) {
        Ipv6Kind::Global
    } else {
        Ipv6Kind::Unknown
    }
}

/// Build an [`Ipv6Info`] from raw textual input, stripping and recording the
/// zone. Returns `None` for syntactically invalid addresses.
pub fn parse_ipv6(raw: &str) -> Option<Ipv6Info> {
    let (addr, zone) = strip_zone(raw.trim());
    let addr = addr.to_lowercase();
    if !is_valid_ipv6(&addr) {
        return None;
    }
    let kind = classify_ipv6(&addr);
    Some(Ipv6Info {
        addr,
        kind,
        scope: zone.map(|z| z.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_is_stripped_and_recorded() {
        let info = parse_ipv6("fe80::1%eth0").unwrap();
        assert_eq!(info.addr, "fe80::1");
        assert_eq!(info.scope.as_deref(), Some("eth0"));
        assert_eq!(info.kind, Ipv6Kind::LinkLocal);

        let bare = parse_ipv6("fe80::1").unwrap();
        assert_eq!(bare.addr, info.addr);
    }

    #[test]
    fn classification_by_leading_bits() {
        assert_eq!(classify_ipv6("fe80::1"), Ipv6Kind::LinkLocal);
        assert_eq!(classify_ipv6("febf::1"), Ipv6Kind::LinkLocal);
        assert_eq!(classify_ipv6("fc00::1"), Ipv6Kind::UniqueLocal);
        assert_eq!(classify_ipv6("fd12:3456::1"), Ipv6Kind::UniqueLocal);
        assert_eq!(classify_ipv6("ff02::fb"), Ipv6Kind::Multicast);
        assert_eq!(classify_ipv6("::1"), Ipv6Kind::Loopback);
        assert_eq!(classify_ipv6("2001:db8::1"), Ipv6Kind::Global);
        assert_eq!(classify_ipv6("3fff::1"), Ipv6Kind::Global);
        assert_eq!(classify_ipv6("::"), Ipv6Kind::Unknown);
        assert_eq!(classify_ipv6("4000::1"), Ipv6Kind::Unknown);
    }

    #[test]
    fn validation_boundaries() {
        assert!(is_valid_ipv6("::"));
        assert!(is_valid_ipv6("::1"));
        assert!(is_valid_ipv6("2001:0db8:0000:0000:0000:0000:0000:0001"));
        assert!(is_valid_ipv6("2001:db8::1"));
        assert!(!is_valid_ipv6(""));
        assert!(!is_valid_ipv6("2001:db8::1::2"));
        assert!(!is_valid_ipv6("2001:db8"));
        assert!(!is_valid_ipv6("2001:db8:::1"));
        assert!(!is_valid_ipv6("12345::1"));
        assert!(!is_valid_ipv6("gggg::1"));
        assert!(!is_valid_ipv6(":2001:db8:0:0:0:0:0:1"));
    }

    #[test]
    fn invalid_input_yields_none() {
        assert!(parse_ipv6("not-an-address").is_none());
        assert!(parse_ipv6("192.168.1.1").is_none());
    }
}
