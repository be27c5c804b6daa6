//! Dynamic batching of streamed quote events.

mod batching;
mod breaker;

pub use batching::{BatchSink, BatchingPipeline};
pub use breaker::{BreakerState, CircuitBreaker};
