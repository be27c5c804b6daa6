//! quotehub-cache
//!
//! The smart cache orchestrator: a strategy-dispatched cache over the
//! `Store` contract with market-driven TTLs, single-flight fetch
//! coalescing, batch fan-in, warm-up, hotspot analysis, and a
//! memory/concurrency governor that adapts fan-out to host load.

mod analysis;
mod batch;
/// Memory/concurrency governor and system probes.
pub mod governor;
mod orchestrator;
/// Dynamic TTL math and access-frequency classification.
pub mod strategy;
mod warmup;

pub use batch::BatchOptions;
pub use governor::{ConcurrencyGovernor, SysinfoProbe, SystemProbe, SystemSample};
pub use orchestrator::{
    AdaptiveSetOptions, AdaptiveSetOutcome, CacheOrchestrator, FetchFn, FetchFuture,
    SmartCacheOutcome, SmartCacheRequest,
};
pub use warmup::WarmupQuery;
