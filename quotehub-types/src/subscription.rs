use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::Capability;

/// Per-client streaming subscription state.
///
/// Invariants maintained by the subscription manager: `symbols` holds no
/// duplicates (set semantics), `last_active <= now`, and a client appears in
/// the symbol→clients inverse index iff `symbols` is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSubscription {
    /// Gateway-assigned client id.
    pub client_id: String,
    /// Subscribed standard symbols.
    pub symbols: BTreeSet<String>,
    /// Streaming capability this client consumes.
    pub capability: Capability,
    /// Provider serving the stream.
    pub provider: String,
    /// First subscription instant.
    pub subscribed_at: DateTime<Utc>,
    /// Most recent activity instant; drives idle reaping.
    pub last_active: DateTime<Utc>,
}

/// What changed for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAction {
    /// Symbols added (or a new client registered).
    Subscribe,
    /// Symbols removed (or a client dropped).
    Unsubscribe,
}

impl ChangeAction {
    /// Stable identifier for listener payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Event delivered to subscription change listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionChange {
    /// What happened.
    pub action: ChangeAction,
    /// Affected client.
    pub client_id: String,
    /// Symbols involved in the change.
    pub symbols: Vec<String>,
    /// Provider serving the client.
    pub provider: String,
    /// Capability the client consumes.
    pub capability: Capability,
}

/// One raw quote event flowing from a provider stream into the batching
/// pipeline.
///
/// `arrived_at` is monotonic per provider connection; the pipeline preserves
/// arrival order within a `(provider, capability)` group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteEvent {
    /// Raw provider payload.
    pub raw: Value,
    /// Provider that produced the event.
    pub provider: String,
    /// Streaming capability the event belongs to.
    pub capability: Capability,
    /// Arrival instant at the broker.
    pub arrived_at: DateTime<Utc>,
    /// Standard symbols the payload covers.
    pub symbols: Vec<String>,
}
