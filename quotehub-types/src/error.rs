use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the quotehub workspace.
///
/// Variants map one-to-one onto the broker's error taxonomy. The split that
/// matters operationally is [`is_user_visible`](Self::is_user_visible):
/// validation, not-found, rate-limit, and upstream failures surface to the
/// caller; storage, gateway, breaker, and memory-pressure conditions are
/// counted and logged but never poison an in-flight response when fresh or
/// cached data exists.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BrokerError {
    /// Bad inputs: shape, range, or size.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No provider or capability matched the request.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing resource, e.g. "provider longport".
        what: String,
    },

    /// A provider fetch exceeded its deadline.
    #[error("upstream timed out: {capability} via {provider}")]
    UpstreamTimeout {
        /// Provider name that timed out.
        provider: String,
        /// Capability label being served.
        capability: String,
    },

    /// A provider returned an error.
    #[error("{provider} failed: {msg}")]
    Upstream {
        /// Provider name that failed.
        provider: String,
        /// Human-readable error message.
        msg: String,
    },

    /// Field mapping failed for a record.
    #[error("transform failed: {0}")]
    Transform(String),

    /// A persist or cache store operation failed.
    #[error("storage failed: {0}")]
    Storage(String),

    /// The WebSocket gateway rejected a push.
    #[error("gateway broadcast failed: {reason}")]
    GatewayBroadcast {
        /// Gateway health detail recorded in broadcast stats.
        reason: String,
    },

    /// The circuit breaker is suppressing downstream calls.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// The governor detected memory pressure.
    #[error("memory pressure: {0}")]
    MemoryPressure(String),

    /// The connection budget for the current window is exhausted.
    #[error("rate limit exceeded: limit={limit} window_ms={window_ms}")]
    RateLimited {
        /// Allowed connections in the window.
        limit: u64,
        /// Window length in milliseconds.
        window_ms: u64,
    },

    /// Unknown/opaque error.
    #[error("unknown error: {0}")]
    Other(String),
}

impl BrokerError {
    /// Helper: build a `Validation` error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Helper: build a `NotFound` error for a description of the missing
    /// resource.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Helper: build an `Upstream` error with the provider name and message.
    pub fn upstream(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Upstream {
            provider: provider.into(),
            msg: msg.into(),
        }
    }

    /// Helper: build an `UpstreamTimeout` error.
    pub fn upstream_timeout(provider: impl Into<String>, capability: impl Into<String>) -> Self {
        Self::UpstreamTimeout {
            provider: provider.into(),
            capability: capability.into(),
        }
    }

    /// Helper: build a `Transform` error.
    pub fn transform(msg: impl Into<String>) -> Self {
        Self::Transform(msg.into())
    }

    /// Helper: build a `Storage` error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Helper: build a `GatewayBroadcast` error.
    pub fn gateway(reason: impl Into<String>) -> Self {
        Self::GatewayBroadcast {
            reason: reason.into(),
        }
    }

    /// Whether this error should reach the caller of a request.
    ///
    /// Operational failures (storage, gateway, breaker, memory pressure) are
    /// internal: they are counted and logged, and the pipeline continues
    /// with whatever fresh or cached data it has.
    #[must_use]
    pub const fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::NotFound { .. }
                | Self::UpstreamTimeout { .. }
                | Self::Upstream { .. }
                | Self::RateLimited { .. }
        )
    }

    /// HTTP-equivalent status for surfaced errors.
    ///
    /// Internal kinds report 500 should they ever escape, which is itself a
    /// bug per [`is_user_visible`](Self::is_user_visible).
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound { .. } => 404,
            Self::RateLimited { .. } => 429,
            Self::UpstreamTimeout { .. } => 504,
            Self::Upstream { .. }
            | Self::Transform(_)
            | Self::Storage(_)
            | Self::GatewayBroadcast { .. }
            | Self::CircuitOpen(_)
            | Self::MemoryPressure(_)
            | Self::Other(_) => 500,
        }
    }
}
