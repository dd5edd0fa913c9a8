//! MAC vendor resolution via the embedded OUI database

use mac_oui::Oui;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::network::mac::normalize_mac;

/// Global OUI database instance (loaded once).
static OUI_DB: OnceLock<Option<Oui>> = OnceLock::new();

/// Per-session full-MAC -> vendor cache. Lookups against the embedded
/// table repeat heavily during a scan; the cache keeps them O(1).
static LOOKUP_CACHE: OnceLock<Mutex<HashMap<String, Option<String>>>> = OnceLock::new();

fn get_oui_db() -> Option<&'static Oui> {
    OUI_DB.get_or_init(|| Oui::default().ok()).as_ref()
}

fn cache() -> &'static Mutex<HashMap<String, Option<String>>> {
    LOOKUP_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Resolve the manufacturer for a MAC address.
///
/// The input is normalised first; the lookup key is the canonical form, so
/// abbreviated and differently-separated spellings hit the same cache slot.
/// Locally-administered and multicast MACs are looked up like any other.
pub fn resolve_vendor(mac: &str) -> Option<String> {
    let canonical = normalize_mac(mac)?;

    if let Ok(cached) = cache().lock()
        && let Some(hit) = cached.get(&canonical)
    {
        return hit.clone();
    }

    let vendor = get_oui_db().and_then(|db| match db.lookup_by_mac(&canonical) {
        Ok(Some(entry)) => Some(entry.company_name.clone()),
        _ => None,
    });

    if let Ok(mut cached) = cache().lock() {
        cached.insert(canonical, vendor.clone());
    }

    vendor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_deterministic_over_spellings() {
        let a = resolve_vendor("00:1C:B3:00:00:00");
        let b = resolve_vendor("00-1c-b3-00-00-00");
        let c = resolve_vendor("001cb3000000");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn malformed_mac_resolves_to_none() {
        assert_eq!(resolve_vendor("not-a-mac"), None);
        assert_eq!(resolve_vendor(""), None);
    }

    #[test]
    fn repeated_lookup_hits_cache() {
        let first = resolve_vendor("AA:BB:CC:00:11:22");
        let second = resolve_vendor("AA:BB:CC:00:11:22");
        assert_eq!(first, second);
    }
}
