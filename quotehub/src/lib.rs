//! quotehub
//!
//! A market-data ingestion, transformation, caching, and streaming broker.
//! Client requests (single-shot, and streaming subscriptions) are routed to
//! the best upstream provider, symbols are normalized per provider, raw
//! payloads flow through field-mapping rules, results are cached with
//! market-status-aware TTLs, and streaming updates fan out to subscribed
//! clients through a dynamic batching pipeline.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quotehub::Broker;
//! use quotehub_mock::{MemoryStore, MockConnector, default_rule_source};
//! use quotehub_types::DataRequest;
//!
//! let broker = Broker::builder()
//!     .with_connector(Arc::new(MockConnector::new()))
//!     .with_store(Arc::new(MemoryStore::new()))
//!     .with_rules(Arc::new(default_rule_source()))
//!     .build()?;
//!
//! let response = broker
//!     .handle(DataRequest::new(
//!         vec!["700.HK".into(), "AAPL".into()],
//!         "get-stock-quote",
//!     ))
//!     .await?;
//! ```

mod core;
/// Dynamic batching pipeline and the transform circuit breaker.
pub mod pipeline;
/// REST request pipeline and connection accounting.
pub mod router;
/// Query statistics emission.
pub mod stats;
mod streams;
/// Stream subscription management, broadcast, and idle reaping.
pub mod subscription;

pub use crate::core::{Broker, BrokerBuilder};
pub use crate::router::{ConnectionGauge, ConnectionSlot};
pub use crate::stats::QueryStatistics;

pub use quotehub_core::Gateway;
pub use quotehub_types::{BrokerError, DataRequest, DataResponse, StreamSubscribeRequest};
