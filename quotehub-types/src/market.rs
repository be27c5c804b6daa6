use core::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Market labels recognized by the broker.
///
/// `Cn` is a meta label covering the mainland exchanges; `Mixed` and
/// `Unknown` are aggregation outcomes of market inference, never markets a
/// status can be computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Market {
    /// United States.
    Us,
    /// Hong Kong.
    Hk,
    /// Shanghai.
    Sh,
    /// Shenzhen.
    Sz,
    /// Singapore.
    Sg,
    /// Mainland China (meta label; resolves to Shanghai for sessions).
    Cn,
    /// Symbols from more than one market.
    Mixed,
    /// No inference pattern matched.
    Unknown,
}

impl Market {
    /// Stable uppercase identifier for logs and storage metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Us => "US",
            Self::Hk => "HK",
            Self::Sh => "SH",
            Self::Sz => "SZ",
            Self::Sg => "SG",
            Self::Cn => "CN",
            Self::Mixed => "MIXED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether a trading calendar exists for this label.
    #[must_use]
    pub const fn has_calendar(self) -> bool {
        !matches!(self, Self::Mixed | Self::Unknown)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trading state of a market at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MarketState {
    /// Before the first session of a trading day.
    PreMarket,
    /// Inside a trading session.
    Trading,
    /// Between two sessions of the same trading day.
    LunchBreak,
    /// After the last session of a trading day.
    AfterHours,
    /// Closed for a reason other than weekend/holiday.
    Closed,
    /// Non-trading weekday per the market calendar.
    Weekend,
    /// Exchange holiday.
    Holiday,
}

impl MarketState {
    /// Stable identifier for logs and metric tags.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreMarket => "PRE_MARKET",
            Self::Trading => "TRADING",
            Self::LunchBreak => "LUNCH_BREAK",
            Self::AfterHours => "AFTER_HOURS",
            Self::Closed => "CLOSED",
            Self::Weekend => "WEEKEND",
            Self::Holiday => "HOLIDAY",
        }
    }
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which TTL a caller wants a recommendation for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TtlMode {
    /// Short TTL for live quote reads.
    Realtime,
    /// Longer TTL for analytical reads.
    Analytical,
}

/// Trading-status advisory a provider can supply for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ProviderAdvisory {
    /// Exchange reports an open session.
    Open,
    /// Exchange reports closed.
    Closed,
    /// Exchange reports pre-open auction.
    PreOpen,
    /// Exchange reports the post-close window.
    PostClose,
    /// Exchange reports a holiday.
    Holiday,
}

impl ProviderAdvisory {
    /// Map an advisory onto the local state set for comparison.
    #[must_use]
    pub const fn as_state(self) -> MarketState {
        match self {
            Self::Open => MarketState::Trading,
            Self::Closed => MarketState::Closed,
            Self::PreOpen => MarketState::PreMarket,
            Self::PostClose => MarketState::AfterHours,
            Self::Holiday => MarketState::Holiday,
        }
    }
}

/// A named interval inside a trading day, in minutes since local midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingSession {
    /// Human-readable session name, e.g. "Morning Session".
    pub name: String,
    /// First trading minute (inclusive).
    pub start_minute: u16,
    /// Last trading minute (exclusive).
    pub end_minute: u16,
}

impl TradingSession {
    /// Build a session from `(hour, minute)` boundaries.
    #[must_use]
    pub fn new(name: impl Into<String>, start: (u16, u16), end: (u16, u16)) -> Self {
        Self {
            name: name.into(),
            start_minute: start.0 * 60 + start.1,
            end_minute: end.0 * 60 + end.1,
        }
    }

    /// Whether the given minute-of-day falls inside this session.
    #[must_use]
    pub const fn contains(&self, minute: u16) -> bool {
        minute >= self.start_minute && minute < self.end_minute
    }
}

/// Pointer to the session that opens next, used during lunch breaks and
/// pre-market windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextSession {
    /// Name of the upcoming session.
    pub name: String,
    /// Minutes until it opens, in market-local time.
    pub opens_in_minutes: u32,
}

/// Computed trading status of a market at an instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStatus {
    /// Market this status describes.
    pub market: Market,
    /// Trading state.
    pub state: MarketState,
    /// Wall-clock time in the market timezone.
    pub local_time: NaiveDateTime,
    /// IANA timezone name the local time was computed in.
    pub timezone: String,
    /// Name of the enclosing session when `state` is `Trading`.
    pub session: Option<String>,
    /// Upcoming session when one exists on the same trading day.
    pub next_session: Option<NextSession>,
    /// Recommended TTL in seconds for realtime reads.
    pub realtime_ttl: u64,
    /// Recommended TTL in seconds for analytical reads.
    pub analytical_ttl: u64,
    /// True when the date is an exchange holiday.
    pub is_holiday: bool,
    /// True when daylight-saving time is in effect locally.
    pub is_dst: bool,
    /// Confidence in the computed state: 0.9 local-only, 0.98 when a
    /// provider advisory agrees, 0.85 when the provider overrides.
    pub confidence: f64,
}

impl MarketStatus {
    /// TTL recommendation for the requested mode.
    #[must_use]
    pub const fn ttl_for(&self, mode: TtlMode) -> u64 {
        match mode {
            TtlMode::Realtime => self.realtime_ttl,
            TtlMode::Analytical => self.analytical_ttl,
        }
    }
}
