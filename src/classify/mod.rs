//! Device classification: OS, usage, and confidence
//!
//! Pure functions of record state plus the embedded rule tables; the
//! correlator calls [`enrich`] after every merge.

pub mod os;
pub mod usage;

pub use os::{OsGuess, detect_os, extract_version};
pub use usage::infer_usage;

use crate::config::USAGE_CONFIDENCE_THRESHOLD;
use crate::models::DeviceRecord;
use crate::network::oui::resolve_vendor;

/// Composite confidence for a record: presence-weighted sum over
/// identifiers and attributes, capped at 100.
pub fn device_confidence(record: &DeviceRecord) -> u8 {
    let mut score = 0u32;
    if record.ipv4.is_some() {
        score += 15;
    }
    if !record.ipv6.is_empty() {
        score += 10;
    }
    if record.mac.is_some() {
        score += 20;
    }
    if record.hostname.is_some() {
        score += 10;
    }
    if record.manufacturer.is_some() {
        score += 10;
    }
    if record.os.is_some() {
        score += 15;
    }
    if record.model.is_some() {
        score += 10;
    }
    if record.usage.is_some() {
        score += 10;
    }
    if !record.ports.is_empty() {
        score += 5;
    }
    if record.is_dual_stack() {
        score += 5;
    }
    score.min(100) as u8
}

/// Re-derive manufacturer, OS, and usage, then recompute confidence.
///
/// Returns true when an attributed field changed (used to surface
/// enrichment events distinct from plain merges).
pub fn enrich(record: &mut DeviceRecord) -> bool {
    let mut changed = false;

    // Manufacturer from OUI when no source supplied one.
    if record.manufacturer.is_none()
        && let Some(mac) = &record.mac
        && let Some(vendor) = resolve_vendor(mac)
    {
        record.manufacturer = Some(vendor);
        changed = true;
    }

    // OS: the family is re-derived from the merged evidence on every
    // pass, so a scanner string arriving after a hostname or
    // manufacturer guess replaces the weaker attribution.
    if let Some(guess) = detect_os(record) {
        if record.os.as_deref() != Some(guess.family.as_str()) {
            record.os = Some(guess.family.clone());
            changed = true;
        }
        if guess.version.is_some() && record.os_version != guess.version {
            record.os_version = guess.version;
            changed = true;
        }
    }

    // Usage: recomputed every pass so stronger evidence can replace an
    // earlier category; applied only above the confidence threshold.
    if let Some((category, confidence)) = infer_usage(record)
        && confidence > USAGE_CONFIDENCE_THRESHOLD
        && record.usage != Some(category)
    {
        record.usage = Some(category);
        changed = true;
    }

    record.confidence = device_confidence(record);
    changed
}
