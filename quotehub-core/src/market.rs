use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Timelike, Weekday};
use chrono_tz::{OffsetComponents, Tz};
use moka::Expiry;
use moka::future::Cache;
use tracing::warn;

use quotehub_types::{
    BrokerError, Market, MarketState, MarketStatus, NextSession, TradingSession, TtlMode,
};

use crate::clock::Clock;
use crate::connector::MarketStatusAdvisor;

/// Per-market trading calendar.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Exchange timezone.
    pub timezone: Tz,
    /// Weekdays with trading.
    pub trading_days: Vec<Weekday>,
    /// Ordered sessions of a trading day.
    pub sessions: Vec<TradingSession>,
    /// Whether the exchange locale observes daylight saving.
    pub dst_support: bool,
    /// Exchange holidays.
    pub holidays: Vec<NaiveDate>,
}

impl MarketConfig {
    /// Built-in calendar for a market label, when one exists.
    ///
    /// `Cn` resolves to the Shanghai calendar; `Mixed`/`Unknown` have none.
    #[must_use]
    pub fn builtin(market: Market) -> Option<Self> {
        const WEEKDAYS: [Weekday; 5] = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ];
        let (timezone, sessions, dst_support) = match market {
            Market::Us => (
                chrono_tz::America::New_York,
                vec![TradingSession::new("Regular Session", (9, 30), (16, 0))],
                true,
            ),
            Market::Hk => (
                chrono_tz::Asia::Hong_Kong,
                vec![
                    TradingSession::new("Morning Session", (9, 30), (12, 0)),
                    TradingSession::new("Afternoon Session", (13, 0), (16, 0)),
                ],
                false,
            ),
            Market::Sh | Market::Sz | Market::Cn => (
                chrono_tz::Asia::Shanghai,
                vec![
                    TradingSession::new("Morning Session", (9, 30), (11, 30)),
                    TradingSession::new("Afternoon Session", (13, 0), (15, 0)),
                ],
                false,
            ),
            Market::Sg => (
                chrono_tz::Asia::Singapore,
                vec![
                    TradingSession::new("Morning Session", (9, 0), (12, 0)),
                    TradingSession::new("Afternoon Session", (13, 0), (17, 0)),
                ],
                false,
            ),
            Market::Mixed | Market::Unknown => return None,
            _ => unreachable!(),
        };
        Some(Self {
            timezone,
            trading_days: WEEKDAYS.to_vec(),
            sessions,
            dst_support,
            holidays: Vec::new(),
        })
    }
}

/// TTL recommendations per trading state, seconds: (realtime, analytical).
const fn ttls_for(state: MarketState) -> (u64, u64) {
    match state {
        MarketState::Trading => (5, 60),
        MarketState::PreMarket | MarketState::LunchBreak | MarketState::AfterHours => (30, 300),
        MarketState::Closed | MarketState::Weekend | MarketState::Holiday => (60, 3_600),
        _ => unreachable!(),
    }
}

/// Status entries live 60 s while trading and 600 s otherwise, so a state
/// flip at the open is picked up quickly without hammering the calendar
/// math off-hours.
struct StateExpiry;

impl Expiry<Market, MarketStatus> for StateExpiry {
    fn expire_after_create(
        &self,
        _key: &Market,
        value: &MarketStatus,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        let secs = if value.state == MarketState::Trading {
            60
        } else {
            600
        };
        Some(Duration::from_secs(secs))
    }
}

/// Computes `(market, instant) -> status` with a short cache, optionally
/// reconciling the local computation against a provider advisory.
pub struct MarketStatusEngine {
    configs: HashMap<Market, MarketConfig>,
    advisor: Option<Arc<dyn MarketStatusAdvisor>>,
    clock: Arc<dyn Clock>,
    cache: Cache<Market, MarketStatus>,
}

impl MarketStatusEngine {
    /// Engine over the built-in calendars.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let mut configs = HashMap::new();
        for market in [Market::Us, Market::Hk, Market::Sh, Market::Sz, Market::Sg, Market::Cn] {
            if let Some(cfg) = MarketConfig::builtin(market) {
                configs.insert(market, cfg);
            }
        }
        Self {
            configs,
            advisor: None,
            clock,
            cache: Cache::builder()
                .max_capacity(16)
                .expire_after(StateExpiry)
                .build(),
        }
    }

    /// Attach a provider advisory source for reconciliation.
    #[must_use]
    pub fn with_advisor(mut self, advisor: Arc<dyn MarketStatusAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Replace or extend a market calendar (e.g. to inject holidays).
    #[must_use]
    pub fn with_config(mut self, market: Market, cfg: MarketConfig) -> Self {
        self.configs.insert(market, cfg);
        self
    }

    /// Current status of a market, cached briefly.
    ///
    /// # Errors
    /// `NotFound` when no calendar exists for the label. Advisory failures
    /// never error: the local computation is returned with its default
    /// confidence and a warning is logged.
    pub async fn get(&self, market: Market) -> Result<MarketStatus, BrokerError> {
        self.cache
            .try_get_with(market, self.compute(market))
            .await
            .map_err(|e: Arc<BrokerError>| (*e).clone())
    }

    /// Status for several markets; one failure degrades that entry, never
    /// the batch.
    pub async fn batch(&self, markets: &[Market]) -> HashMap<Market, MarketStatus> {
        let mut out = HashMap::with_capacity(markets.len());
        for &market in markets {
            match self.get(market).await {
                Ok(status) => {
                    out.insert(market, status);
                }
                Err(err) => {
                    warn!(
                        target = "quotehub::market",
                        %market,
                        %err,
                        "market status unavailable; entry omitted from batch"
                    );
                }
            }
        }
        out
    }

    /// Recommended cache TTL for the market in the given mode.
    ///
    /// Falls back to the closed-market TTLs when no status can be computed.
    pub async fn recommended_ttl(&self, market: Market, mode: TtlMode) -> u64 {
        match self.get(market).await {
            Ok(status) => status.ttl_for(mode),
            Err(_) => {
                let (realtime, analytical) = ttls_for(MarketState::Closed);
                match mode {
                    TtlMode::Realtime => realtime,
                    TtlMode::Analytical => analytical,
                }
            }
        }
    }

    async fn compute(&self, market: Market) -> Result<MarketStatus, BrokerError> {
        let cfg = self
            .configs
            .get(&market)
            .ok_or_else(|| BrokerError::not_found(format!("market calendar for {market}")))?;

        let mut status = compute_local(market, cfg, self.clock.now_utc());

        if let Some(advisor) = &self.advisor {
            match advisor.market_advisory(market).await {
                Ok(advisory) => {
                    let advised = advisory.as_state();
                    if advised == status.state {
                        status.confidence = 0.98;
                    } else {
                        // Provider wins on disagreement.
                        status.state = advised;
                        status.is_holiday = advised == MarketState::Holiday;
                        let (realtime, analytical) = ttls_for(advised);
                        status.realtime_ttl = realtime;
                        status.analytical_ttl = analytical;
                        status.confidence = 0.85;
                    }
                }
                Err(err) => {
                    warn!(
                        target = "quotehub::market",
                        %market,
                        %err,
                        "provider advisory unavailable; using local computation"
                    );
                }
            }
        }

        Ok(status)
    }
}

/// Pure local computation of a market status from its calendar.
#[must_use]
pub fn compute_local(
    market: Market,
    cfg: &MarketConfig,
    now_utc: chrono::DateTime<chrono::Utc>,
) -> MarketStatus {
    let local = now_utc.with_timezone(&cfg.timezone);
    let offset = local.offset();
    let is_dst = cfg.dst_support && !offset.dst_offset().is_zero();
    let minute = u16::try_from(local.hour() * 60 + local.minute()).unwrap_or(u16::MAX);

    let mut session = None;
    let mut next_session = None;

    let state = if cfg.holidays.contains(&local.date_naive()) {
        MarketState::Holiday
    } else if !cfg.trading_days.contains(&local.weekday()) {
        MarketState::Weekend
    } else if let Some(current) = cfg.sessions.iter().find(|s| s.contains(minute)) {
        session = Some(current.name.clone());
        MarketState::Trading
    } else if cfg
        .sessions
        .first()
        .is_some_and(|first| minute < first.start_minute)
    {
        next_session = cfg.sessions.first().map(|s| NextSession {
            name: s.name.clone(),
            opens_in_minutes: u32::from(s.start_minute - minute),
        });
        MarketState::PreMarket
    } else if cfg
        .sessions
        .last()
        .is_some_and(|last| minute >= last.end_minute)
    {
        MarketState::AfterHours
    } else {
        // Between two sessions of the same day.
        next_session = cfg
            .sessions
            .iter()
            .find(|s| s.start_minute > minute)
            .map(|s| NextSession {
                name: s.name.clone(),
                opens_in_minutes: u32::from(s.start_minute - minute),
            });
        MarketState::LunchBreak
    };

    let (realtime_ttl, analytical_ttl) = ttls_for(state);

    MarketStatus {
        market,
        state,
        local_time: local.naive_local(),
        timezone: cfg.timezone.name().to_string(),
        session,
        next_session,
        realtime_ttl,
        analytical_ttl,
        is_holiday: state == MarketState::Holiday,
        is_dst,
        confidence: 0.9,
    }
}
