use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use quotehub_types::{
    ApiType, BrokerError, Capability, Direction, Market, ProviderAdvisory, QuoteEvent,
};

use crate::stream::StreamHandle;

/// Parameters of one provider fetch.
#[derive(Debug, Clone)]
pub struct ProviderFetchRequest {
    /// Capability being served.
    pub capability: Capability,
    /// Provider-form symbols to fetch.
    pub symbols: Vec<String>,
    /// Transport surface.
    pub api_type: ApiType,
    /// Correlation id assigned at ingress.
    pub request_id: String,
    /// Deadline for the call.
    pub timeout: Duration,
    /// Field projection hint.
    pub fields: Option<Vec<String>>,
    /// Caller wants live rather than delayed data.
    pub realtime: bool,
}

/// Focused role trait for connectors that serve single-shot fetches.
///
/// Implementations return raw provider-shaped records; field mapping happens
/// downstream.
#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    /// Fetch raw records for the given request.
    async fn fetch(&self, req: &ProviderFetchRequest) -> Result<Vec<Value>, BrokerError>;
}

/// Focused role trait for connectors that stream quote events.
#[async_trait]
pub trait QuoteStreamer: Send + Sync {
    /// Open a streaming session for the given provider-form symbols.
    ///
    /// The returned receiver yields raw events until the handle is stopped
    /// or the provider closes the connection.
    async fn stream_quotes(
        &self,
        symbols: &[String],
        capability: Capability,
    ) -> Result<(StreamHandle, tokio::sync::mpsc::Receiver<QuoteEvent>), BrokerError>;
}

/// Focused role trait for connectors that can report exchange trading
/// status, used to reconcile the locally computed market state.
#[async_trait]
pub trait MarketStatusAdvisor: Send + Sync {
    /// Fetch the provider's trading-status advisory for a market.
    async fn market_advisory(&self, market: Market) -> Result<ProviderAdvisory, BrokerError>;
}

/// Focused role trait for connectors that translate between standard and
/// provider symbol forms.
#[async_trait]
pub trait SymbolMapper: Send + Sync {
    /// Bulk-translate symbols in the given direction.
    ///
    /// The result maps each translatable input to its output; inputs absent
    /// from the map had no translation. A returned error means the mapping
    /// source itself failed.
    async fn map_symbols(
        &self,
        symbols: &[String],
        direction: Direction,
    ) -> Result<HashMap<String, String>, BrokerError>;
}

/// Main connector trait implemented by provider crates. Exposes capability
/// discovery through `as_*` accessors returning usable trait objects.
pub trait ProviderConnector: Send + Sync {
    /// A stable identifier used in priority lists, storage keys, and logs
    /// (e.g. "longport").
    fn name(&self) -> &'static str;

    /// Selection priority; lower wins. Ties break on registration order.
    fn priority(&self) -> u8 {
        100
    }

    /// Whether this connector claims to serve the given market.
    ///
    /// Default: no markets. Connectors must override to declare coverage.
    fn supports_market(&self, market: Market) -> bool {
        let _ = market;
        false
    }

    /// Whether this connector can serve a capability, derived from the role
    /// accessors below.
    fn supports(&self, capability: Capability) -> bool {
        if capability.is_streaming() {
            self.as_quote_streamer().is_some()
        } else if capability == Capability::GetMarketStatus {
            self.as_market_status_advisor().is_some() || self.as_quote_fetcher().is_some()
        } else {
            self.as_quote_fetcher().is_some()
        }
    }

    /// Advertise single-shot fetch capability.
    fn as_quote_fetcher(&self) -> Option<&dyn QuoteFetcher> {
        None
    }

    /// Advertise streaming capability.
    fn as_quote_streamer(&self) -> Option<&dyn QuoteStreamer> {
        None
    }

    /// Advertise market-status advisory capability.
    fn as_market_status_advisor(&self) -> Option<&dyn MarketStatusAdvisor> {
        None
    }

    /// Advertise symbol translation capability.
    fn as_symbol_mapper(&self) -> Option<&dyn SymbolMapper> {
        None
    }
}
