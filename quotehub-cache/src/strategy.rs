use quotehub_types::{AccessFrequency, CacheConfig};

/// Accesses inside the tracking window at or above which a key is hot.
pub const HIGH_FREQUENCY_ACCESSES: u32 = 20;
/// Accesses inside the tracking window at or above which a key is warm.
pub const MEDIUM_FREQUENCY_ACCESSES: u32 = 5;

/// Classify a recent access count into a frequency band.
#[must_use]
pub const fn classify_frequency(recent_accesses: u32) -> AccessFrequency {
    if recent_accesses >= HIGH_FREQUENCY_ACCESSES {
        AccessFrequency::High
    } else if recent_accesses >= MEDIUM_FREQUENCY_ACCESSES {
        AccessFrequency::Medium
    } else {
        AccessFrequency::Low
    }
}

/// Scale a base TTL by access frequency and clamp to the configured band.
///
/// Low-frequency keys stretch to 4x (fewer refreshes for cold data), high
/// frequency halves the TTL to keep hot reads fresh.
#[must_use]
pub fn dynamic_ttl(cfg: &CacheConfig, base_ttl_secs: u64, frequency: AccessFrequency) -> u64 {
    frequency
        .scale(base_ttl_secs)
        .clamp(cfg.min_ttl_secs, cfg.max_ttl_secs)
}
