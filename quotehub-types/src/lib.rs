//! quotehub-types
//!
//! Shared data transfer objects for the quotehub market-data broker:
//! capability labels, market labels, the error taxonomy, env-driven
//! configuration, metric events, and response envelopes.
#![warn(missing_docs)]

/// Capability labels and the derived rule-list / storage tables.
pub mod capability;
/// Cache strategy labels and cached-record envelopes.
pub mod cache;
/// Env-driven configuration structs with documented defaults.
pub mod config;
/// Unified error taxonomy shared by every crate in the workspace.
pub mod error;
/// Market labels, market states, and market-status snapshots.
pub mod market;
/// Metric event records and stable metric names.
pub mod metrics;
/// Response envelopes, broadcast statistics, and analysis reports.
pub mod reports;
/// Request shapes for the REST and streaming surfaces.
pub mod request;
/// Field-mapping rule records consumed read-only by the transformer.
pub mod rules;
/// Client subscription state and change events.
pub mod subscription;
/// Explicit request validators returning structured reports.
pub mod validation;

pub use capability::{ApiType, Capability, RuleListType, StorageClassification};
pub use cache::{AccessFrequency, CacheStrategy, CachedRecord};
pub use config::{
    BatchingConfig, BreakerConfig, BrokerConfig, CacheConfig, GovernorConfig, RateLimitConfig,
    StatsConfig, SubscriptionConfig,
};
pub use error::BrokerError;
pub use market::{
    Market, MarketState, MarketStatus, NextSession, ProviderAdvisory, TradingSession, TtlMode,
};
pub use metrics::{MetricEvent, MetricType};
pub use reports::{
    BroadcastAnalysis, BroadcastStatsReport, BroadcastStatsSnapshot, CacheAnalysisReport,
    CacheAnalysisSummary, CacheHotspot, DataResponse, Direction, HealthStatus, ResponseMeta,
    SymbolTransformResult, TransformMetadata, WarmupOutcome,
};
pub use request::{DataRequest, RequestOptions, StreamSubscribeRequest};
pub use rules::{FieldMapping, TransformKind, ValueTransform};
pub use subscription::{ChangeAction, ClientSubscription, QuoteEvent, SubscriptionChange};
pub use validation::ValidationReport;
