//! Deterministic raw-record fixtures shaped like provider payloads.

use serde_json::{Value, json};

use quotehub_core::InMemoryRuleSource;

/// Raw provider record for a symbol. Unknown symbols get a synthetic but
/// stable payload so tests never depend on fixture coverage.
#[must_use]
pub fn raw_record(symbol: &str) -> Value {
    match symbol {
        "00700" | "700.HK" => json!({
            "symbol": symbol,
            "last_done": 321.2,
            "open": 318.0,
            "high": 323.8,
            "low": 317.4,
            "volume": 14_250_000,
            "turnover": 4_575_300_000.0,
            "timestamp": 1_753_930_800,
        }),
        "AAPL.US" | "AAPL" => json!({
            "symbol": symbol,
            "last_done": 227.52,
            "open": 226.0,
            "high": 229.1,
            "low": 225.3,
            "volume": 48_210_000,
            "turnover": 10_964_000_000.0,
            "timestamp": 1_753_930_800,
        }),
        // Malformed payload: no symbol field, so required quote mappings
        // fail for this record.
        "NOSYM" => json!({
            "last_done": 1.0,
            "volume": 100,
        }),
        other => json!({
            "symbol": other,
            "last_done": 100.0,
            "open": 99.0,
            "high": 101.0,
            "low": 98.5,
            "volume": 1_000_000,
            "turnover": 100_000_000.0,
            "timestamp": 1_753_930_800,
        }),
    }
}

/// Rule source pre-populated for the default mock provider name.
#[must_use]
pub fn default_rule_source() -> InMemoryRuleSource {
    crate::rules_for("longport")
}
