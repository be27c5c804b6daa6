//! quotehub-core
//!
//! Core traits and engines shared across the quotehub ecosystem.
//!
//! - `connector`: the `ProviderConnector` trait and capability role traits.
//! - `registry`: priority- and market-aware provider selection.
//! - `market`: the market status engine driving cache TTLs.
//! - `symbols`: bulk symbol translation and market inference.
//! - `mapping`: field-mapping rule application over raw records.
//! - `store`: the narrow persistence contract.
//! - `metrics`: the bounded, non-blocking metrics bus.
#![warn(missing_docs)]

/// Clock seam used wherever wall-clock time feeds a decision.
pub mod clock;
/// Provider role traits and the primary `ProviderConnector` interface.
pub mod connector;
/// Boundary trait to the WebSocket gateway.
pub mod gateway;
/// Field-mapping rule sources and record transformation.
pub mod mapping;
/// Market status engine: sessions, holidays, provider reconciliation.
pub mod market;
/// Bounded metrics bus decoupling hot paths from the collector.
pub mod metrics;
/// Capability catalogue and provider selection.
pub mod registry;
/// The persistence contract the broker writes through.
pub mod store;
/// Stream handle for long-lived provider streaming tasks.
pub mod stream;
/// Symbol transformation and market inference.
pub mod symbols;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connector::{
    MarketStatusAdvisor, ProviderConnector, ProviderFetchRequest, QuoteFetcher, QuoteStreamer,
    SymbolMapper,
};
pub use gateway::Gateway;
pub use mapping::{InMemoryRuleSource, RecordTransformer, RuleSource};
pub use market::{MarketConfig, MarketStatusEngine};
pub use metrics::{ChannelMetricsBus, MetricsBus, NullMetricsBus};
pub use registry::ProviderRegistry;
pub use store::{Store, StorageMeta};
pub use stream::StreamHandle;
pub use symbols::{SymbolTransformer, infer_market, infer_market_for_symbol};

pub use quotehub_types::BrokerError;
