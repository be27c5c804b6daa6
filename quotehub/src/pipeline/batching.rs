use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use quotehub_core::{MetricsBus, RecordTransformer};
use quotehub_types::metrics::names;
use quotehub_types::{ApiType, BatchingConfig, Capability, MetricEvent, MetricType, QuoteEvent};

use super::breaker::CircuitBreaker;

/// Callbacks invoked for records flowing through the batching pipeline.
///
/// The broker wires these to the cache, the subscription manager, and query
/// statistics. Implementations must absorb their own failures: a sink error
/// never stops the pipeline.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Normalize the symbol field on a transformed record.
    fn ensure_symbol_consistency(&self, record: &mut Value, event: &QuoteEvent);

    /// Persist a transformed record.
    async fn cache_data(&self, record: &Value, event: &QuoteEvent);

    /// Fan a record out to subscribed clients. `degraded` marks records
    /// that bypassed the transform on the fallback path.
    async fn broadcast_data(&self, record: &Value, event: &QuoteEvent, degraded: bool);

    /// Record per-batch throughput observations.
    fn record_metrics(&self, provider: &str, capability: Capability, records: usize, elapsed_ms: u64);
}

/// Time-windowed batching of streamed quote events with adaptive interval
/// tuning and a circuit breaker around the transform stage.
///
/// One cooperative consumer task per pipeline; producers append through the
/// non-blocking [`add_quote`](Self::add_quote).
pub struct BatchingPipeline {
    tx: mpsc::UnboundedSender<QuoteEvent>,
    current_interval_ms: Arc<AtomicU64>,
    consumer: JoinHandle<()>,
}

impl BatchingPipeline {
    /// Spawn the consumer task.
    #[must_use]
    pub fn spawn(
        cfg: BatchingConfig,
        transformer: Arc<RecordTransformer>,
        breaker: Arc<CircuitBreaker>,
        sink: Arc<dyn BatchSink>,
        metrics: Arc<dyn MetricsBus>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let current_interval_ms = Arc::new(AtomicU64::new(
            cfg.clamp_interval(cfg.base_interval_ms),
        ));
        let consumer = tokio::spawn(consume(
            cfg,
            rx,
            transformer,
            breaker,
            sink,
            metrics,
            Arc::clone(&current_interval_ms),
        ));
        Self {
            tx,
            current_interval_ms,
            consumer,
        }
    }

    /// Append one event; never blocks. Events after shutdown are dropped.
    pub fn add_quote(&self, event: QuoteEvent) {
        if self.tx.send(event).is_err() {
            warn!(
                target = "quotehub::pipeline",
                "quote dropped; pipeline consumer is gone"
            );
        }
    }

    /// Flush interval currently in effect, milliseconds.
    #[must_use]
    pub fn current_interval_ms(&self) -> u64 {
        self.current_interval_ms.load(Ordering::Relaxed)
    }

    /// Stop the consumer immediately; queued events are dropped.
    pub fn abort(&self) {
        self.consumer.abort();
    }
}

#[allow(clippy::too_many_lines)]
async fn consume(
    cfg: BatchingConfig,
    mut rx: mpsc::UnboundedReceiver<QuoteEvent>,
    transformer: Arc<RecordTransformer>,
    breaker: Arc<CircuitBreaker>,
    sink: Arc<dyn BatchSink>,
    metrics: Arc<dyn MetricsBus>,
    current_interval_ms: Arc<AtomicU64>,
) {
    let mut buffer: Vec<QuoteEvent> = Vec::new();
    let mut samples: VecDeque<usize> = VecDeque::with_capacity(cfg.sample_window.max(1));
    let mut interval_ms = cfg.clamp_interval(cfg.base_interval_ms);
    let mut flush_timer = make_timer(interval_ms);
    let adjustment_every = Duration::from_millis(cfg.adjustment_frequency_ms.max(1));
    let mut last_adjustment = Instant::now();

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(event) => buffer.push(event),
                None => {
                    if !buffer.is_empty() {
                        process_batch(&transformer, &breaker, &sink, &metrics, std::mem::take(&mut buffer)).await;
                    }
                    debug!(target = "quotehub::pipeline", "producer side closed; consumer exiting");
                    return;
                }
            },
            _ = flush_timer.tick() => {
                let batch = std::mem::take(&mut buffer);
                samples.push_back(batch.len());
                while samples.len() > cfg.sample_window.max(1) {
                    samples.pop_front();
                }
                if !batch.is_empty() {
                    process_batch(&transformer, &breaker, &sink, &metrics, batch).await;
                }

                if cfg.enabled && last_adjustment.elapsed() >= adjustment_every {
                    last_adjustment = Instant::now();
                    let (next, load_level, direction) = next_interval(&cfg, interval_ms, &samples);
                    if next != interval_ms {
                        info!(
                            target = "quotehub::pipeline",
                            old = interval_ms,
                            new = next,
                            load_level,
                            direction,
                            "batch interval adjusted"
                        );
                        metrics.emit(
                            MetricEvent::new(
                                "stream_pipeline",
                                MetricType::Stream,
                                names::BATCH_INTERVAL_ADJUSTED,
                                next as f64,
                            )
                            .with_tag("old", interval_ms.to_string())
                            .with_tag("new", next.to_string())
                            .with_tag("load_level", load_level)
                            .with_tag("direction", direction),
                        );
                        interval_ms = next;
                        current_interval_ms.store(next, Ordering::Relaxed);
                        flush_timer = make_timer(next);
                    }
                }
            }
        }
    }
}

fn make_timer(interval_ms: u64) -> tokio::time::Interval {
    let period = Duration::from_millis(interval_ms.max(1));
    let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    timer
}

/// Pick the next flush interval from the mean recent batch size.
fn next_interval(
    cfg: &BatchingConfig,
    current_ms: u64,
    samples: &VecDeque<usize>,
) -> (u64, &'static str, &'static str) {
    if samples.is_empty() {
        return (current_ms, "idle", "hold");
    }
    let mean = samples.iter().sum::<usize>() as f64 / samples.len() as f64;

    let (target, load_level) = if mean >= cfg.high_load_threshold as f64 {
        (cfg.high_load_interval_ms, "high")
    } else if mean <= cfg.low_load_threshold as f64 {
        (cfg.low_load_interval_ms, "low")
    } else {
        // Nudge back towards base one step at a time.
        let step = cfg.adjustment_step_ms;
        let nudged = if current_ms > cfg.base_interval_ms {
            current_ms.saturating_sub(step).max(cfg.base_interval_ms)
        } else if current_ms < cfg.base_interval_ms {
            (current_ms + step).min(cfg.base_interval_ms)
        } else {
            current_ms
        };
        (nudged, "normal")
    };

    let clamped = cfg.clamp_interval(target);
    let direction = match clamped.cmp(&current_ms) {
        std::cmp::Ordering::Less => "faster",
        std::cmp::Ordering::Greater => "slower",
        std::cmp::Ordering::Equal => "hold",
    };
    (clamped, load_level, direction)
}

/// Process one drained batch: group by `(provider, capability)` preserving
/// arrival order, transform behind the breaker, and run the sink callbacks.
/// Malformed records fall back per record and never stop the batch.
async fn process_batch(
    transformer: &Arc<RecordTransformer>,
    breaker: &Arc<CircuitBreaker>,
    sink: &Arc<dyn BatchSink>,
    metrics: &Arc<dyn MetricsBus>,
    batch: Vec<QuoteEvent>,
) {
    let mut order: Vec<(String, Capability)> = Vec::new();
    let mut groups: HashMap<(String, Capability), Vec<QuoteEvent>> = HashMap::new();
    for event in batch {
        let key = (event.provider.clone(), event.capability);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(event);
    }

    for key in order {
        let events = groups.remove(&key).unwrap_or_default();
        let (provider, capability) = key;
        let started = Instant::now();
        let rule_list = capability.rule_list_type();
        let record_count = events.len();

        for event in events {
            if breaker.allow() {
                match transformer.transform_record(&provider, ApiType::Stream, rule_list, &event.raw)
                {
                    Ok(mut record) => {
                        breaker.record_success();
                        sink.ensure_symbol_consistency(&mut record, &event);
                        sink.cache_data(&record, &event).await;
                        sink.broadcast_data(&record, &event, false).await;
                    }
                    Err(err) => {
                        breaker.record_failure();
                        fallback(sink, metrics, &event, &err.to_string()).await;
                    }
                }
            } else {
                fallback(sink, metrics, &event, "circuit open").await;
            }
        }

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        sink.record_metrics(&provider, capability, record_count, elapsed_ms);
    }
}

/// Degraded path: push the raw record through broadcast and count it.
async fn fallback(
    sink: &Arc<dyn BatchSink>,
    metrics: &Arc<dyn MetricsBus>,
    event: &QuoteEvent,
    reason: &str,
) {
    debug!(
        target = "quotehub::pipeline",
        provider = %event.provider,
        capability = %event.capability,
        reason,
        "record routed through fallback path"
    );
    sink.broadcast_data(&event.raw, event, true).await;
    metrics.emit(
        MetricEvent::new(
            "stream_pipeline",
            MetricType::Stream,
            names::STREAM_PIPELINE_FALLBACK,
            1.0,
        )
        .with_tag("provider", event.provider.clone())
        .with_tag("capability", event.capability.as_str())
        .with_tag("reason", reason.to_string()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BatchingConfig {
        BatchingConfig::default()
    }

    fn samples(values: &[usize]) -> VecDeque<usize> {
        values.iter().copied().collect()
    }

    #[test]
    fn high_load_selects_the_fast_interval() {
        let (next, level, direction) = next_interval(&cfg(), 50, &samples(&[20, 18, 16]));
        assert_eq!(next, 25);
        assert_eq!(level, "high");
        assert_eq!(direction, "faster");
    }

    #[test]
    fn low_load_selects_the_slow_interval() {
        let (next, level, _) = next_interval(&cfg(), 50, &samples(&[1, 2, 0]));
        assert_eq!(next, 100);
        assert_eq!(level, "low");
    }

    #[test]
    fn normal_load_nudges_towards_base() {
        let (from_fast, _, _) = next_interval(&cfg(), 25, &samples(&[10, 10]));
        assert_eq!(from_fast, 30);
        let (from_slow, _, _) = next_interval(&cfg(), 100, &samples(&[10, 10]));
        assert_eq!(from_slow, 95);
        let (at_base, _, direction) = next_interval(&cfg(), 50, &samples(&[10, 10]));
        assert_eq!(at_base, 50);
        assert_eq!(direction, "hold");
    }

    #[test]
    fn intervals_always_stay_inside_the_clamp() {
        let mut config = cfg();
        config.high_load_interval_ms = 1;
        config.low_load_interval_ms = 10_000;
        let (fast, _, _) = next_interval(&config, 50, &samples(&[100]));
        assert_eq!(fast, config.min_interval_ms);
        let (slow, _, _) = next_interval(&config, 50, &samples(&[0]));
        assert_eq!(slow, config.max_interval_ms);
    }
}
