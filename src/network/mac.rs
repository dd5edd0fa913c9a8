//! MAC address normalisation and predicates

/// Normalise a MAC address to uppercase colon-separated canonical form.
///
/// Accepts `:`-separated, `-`-separated, and unseparated 12-digit forms.
/// Single-hex-digit octets are left-padded (`0:0:5e:0:1:f` becomes
/// `00:00:5E:00:01:0F`). Returns `None` when the result is not a valid
/// six-octet address.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let octets: Vec<String> = if trimmed.contains(':') || trimmed.contains('-') {
        trimmed
            .split(|c| c == ':' || c == '-')
            .map(|part| part.trim().to_string())
            .collect()
    } else {
        if trimmed.len() != 12 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        trimmed
            .as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).to_string())
            .collect()
    };

    if octets.len() != 6 {
        return None;
    }

    let mut parts = Vec::with_capacity(6);
    for octet in octets {
        if octet.is_empty() || octet.len() > 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        parts.push(format!("{:0>2}", octet.to_uppercase()));
    }

    let canonical = parts.join(":");
    if canonical.len() != 17 {
        return None;
    }
    Some(canonical)
}

/// Parse the first octet of a canonical or raw MAC string.
fn first_octet(mac: &str) -> Option<u8> {
    let digits: String = mac
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(2)
        .collect();
    if digits.len() < 2 {
        return None;
    }
    u8::from_str_radix(&digits, 16).ok()
}

/// Locally-administered bit (0x02) set in the first octet.
/// Indicates randomized or virtual addresses.
pub fn is_locally_administered(mac: &str) -> bool {
    first_octet(mac).is_some_and(|b| b & 0x02 != 0)
}

/// Multicast bit (0x01) set in the first octet.
pub fn is_multicast_mac(mac: &str) -> bool {
    first_octet(mac).is_some_and(|b| b & 0x01 != 0)
}

/// The Ethernet broadcast address.
pub fn is_broadcast_mac(mac: &str) -> bool {
    normalize_mac(mac).as_deref() == Some("FF:FF:FF:FF:FF:FF")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_abbreviated_octets() {
        assert_eq!(
            normalize_mac("0:0:5e:0:1:f").as_deref(),
            Some("00:00:5E:00:01:0F")
        );
    }

    #[test]
    fn normalizes_dash_and_bare_forms() {
        assert_eq!(
            normalize_mac("aa-bb-cc-dd-ee-ff").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(
            normalize_mac("aabbccddeeff").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(normalize_mac(""), None);
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee"), None);
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee:ff:11"), None);
        assert_eq!(normalize_mac("zz:bb:cc:dd:ee:ff"), None);
        assert_eq!(normalize_mac("aabbccddee"), None);
    }

    #[test]
    fn predicates() {
        assert!(is_locally_administered("5a:05:d7:51:07:81"));
        assert!(!is_locally_administered("34:4a:c3:22:6f:90"));
        assert!(is_multicast_mac("01:00:5e:00:00:fb"));
        assert!(!is_multicast_mac("00:1C:B3:00:00:00"));
        assert!(is_broadcast_mac("ff:ff:ff:ff:ff:ff"));
        assert!(!is_broadcast_mac("ff:ff:ff:ff:ff:00"));
    }
}
