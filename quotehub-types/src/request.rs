use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheStrategy;

/// Options accepted by the single-shot data request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Provider fetch deadline in milliseconds; the pipeline default applies
    /// when absent.
    pub timeout_ms: Option<u64>,
    /// Field projection hint forwarded to the provider.
    pub fields: Option<Vec<String>>,
    /// Pin the request to a named provider instead of registry selection.
    pub preferred_provider: Option<String>,
    /// Hint that the caller wants live rather than delayed data.
    pub realtime: bool,
    /// Route through the smart cache orchestrator (default true).
    pub use_smart_cache: bool,
    /// Cache strategy override.
    pub strategy: Option<CacheStrategy>,
}

impl RequestOptions {
    /// Provider fetch deadline with the default applied.
    #[must_use]
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_ms.map_or(default, Duration::from_millis)
    }
}

/// Single-shot data request.
///
/// Shared fields are embedded rather than inherited; validation is explicit
/// via [`crate::validation::validate_data_request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    /// Standard symbols to resolve.
    pub symbols: Vec<String>,
    /// Capability identifier, e.g. `get-stock-quote`.
    pub receiver_type: String,
    /// Request options.
    #[serde(default)]
    pub options: RequestOptions,
}

impl DataRequest {
    /// Convenience constructor with default options.
    #[must_use]
    pub fn new(symbols: Vec<String>, receiver_type: impl Into<String>) -> Self {
        Self {
            symbols,
            receiver_type: receiver_type.into(),
            options: RequestOptions {
                use_smart_cache: true,
                ..RequestOptions::default()
            },
        }
    }
}

/// Streaming subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSubscribeRequest {
    /// Standard symbols to subscribe.
    pub symbols: Vec<String>,
    /// Streaming capability identifier, e.g. `stream-stock-quote`.
    pub ws_capability_type: String,
    /// Pin the subscription to a named provider.
    pub preferred_provider: Option<String>,
}
