use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use quotehub_types::metrics::names;
use quotehub_types::validation::{MAX_BATCH_SIZE, MAX_SYMBOL_LENGTH};
use quotehub_types::{
    BrokerError, Direction, Market, MetricEvent, MetricType, SymbolTransformResult,
    TransformMetadata,
};

use crate::connector::ProviderConnector;
use crate::metrics::MetricsBus;

/// Infer the market of one symbol from its shape.
///
/// CN: six digits. US: letters only. HK: `.HK` suffix, case-insensitive.
/// Anything else is `Unknown`.
#[must_use]
pub fn infer_market_for_symbol(symbol: &str) -> Market {
    let s = symbol.trim();
    if s.len() == 6 && s.bytes().all(|b| b.is_ascii_digit()) {
        return Market::Cn;
    }
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Market::Us;
    }
    if s.len() > 3
        && s.get(s.len() - 3..)
            .is_some_and(|suffix| suffix.eq_ignore_ascii_case(".hk"))
    {
        return Market::Hk;
    }
    Market::Unknown
}

/// Aggregate market inference over a symbol list.
///
/// All symbols agreeing yields that market; disagreement yields `Mixed`;
/// no pattern matching anything yields `Unknown`.
#[must_use]
pub fn infer_market(symbols: &[String]) -> Market {
    let mut aggregate: Option<Market> = None;
    for symbol in symbols {
        let market = infer_market_for_symbol(symbol);
        if market == Market::Unknown {
            continue;
        }
        aggregate = match aggregate {
            None => Some(market),
            Some(prev) if prev == market => Some(prev),
            Some(_) => return Market::Mixed,
        };
    }
    aggregate.unwrap_or(Market::Unknown)
}

/// Output of [`SymbolTransformer::transform_for_provider`].
#[derive(Debug, Clone)]
pub struct ProviderSymbols {
    /// Symbols in the form the provider expects, input order preserved.
    pub symbols: Vec<String>,
    /// Mapping applied to the symbols that needed translation.
    pub mapping: HashMap<String, String>,
}

/// Bulk provider-specific symbol translation with validation and metrics.
pub struct SymbolTransformer {
    metrics: Arc<dyn MetricsBus>,
}

impl SymbolTransformer {
    /// Build a transformer emitting onto the given bus.
    #[must_use]
    pub fn new(metrics: Arc<dyn MetricsBus>) -> Self {
        Self { metrics }
    }

    fn validate(symbols: &[String], direction: Direction) -> Result<(), BrokerError> {
        let _ = direction;
        if symbols.is_empty() {
            return Err(BrokerError::validation("symbols must not be empty"));
        }
        if symbols.len() > MAX_BATCH_SIZE {
            return Err(BrokerError::validation(format!(
                "too many symbols: {} exceeds the limit of {MAX_BATCH_SIZE}",
                symbols.len()
            )));
        }
        for s in symbols {
            if s.trim().is_empty() {
                return Err(BrokerError::validation("symbols must be non-empty strings"));
            }
            if s.len() > MAX_SYMBOL_LENGTH {
                let prefix: String = s.chars().take(MAX_SYMBOL_LENGTH).collect();
                return Err(BrokerError::validation(format!(
                    "symbol '{prefix}…' exceeds {MAX_SYMBOL_LENGTH} characters"
                )));
            }
        }
        Ok(())
    }

    /// Bulk-translate symbols through the provider's mapper.
    ///
    /// Per-symbol mapping gaps land in `failed`; a fatal mapper failure
    /// yields the all-failed envelope and a `symbol_transformation_failed`
    /// metric, never an `Err`. The metadata totals always satisfy
    /// `total == success + failed`.
    ///
    /// # Errors
    /// Only validation failures (empty list, oversized batch, malformed
    /// symbols) error.
    pub async fn transform(
        &self,
        provider: &Arc<dyn ProviderConnector>,
        symbols: &[String],
        direction: Direction,
    ) -> Result<SymbolTransformResult, BrokerError> {
        Self::validate(symbols, direction)?;
        let started = Instant::now();

        let mapped_pairs = match provider.as_symbol_mapper() {
            Some(mapper) => mapper.map_symbols(symbols, direction).await,
            None => Err(BrokerError::upstream(
                provider.name(),
                "connector exposes no symbol mapper",
            )),
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let pairs = match mapped_pairs {
            Ok(pairs) => pairs,
            Err(err) => {
                warn!(
                    target = "quotehub::symbols",
                    provider = provider.name(),
                    direction = direction.as_str(),
                    %err,
                    "bulk symbol mapping failed"
                );
                self.metrics.emit(
                    MetricEvent::new(
                        "symbol_transformer",
                        MetricType::Alert,
                        names::SYMBOL_TRANSFORMATION_FAILED,
                        symbols.len() as f64,
                    )
                    .with_tag("provider", provider.name())
                    .with_tag("direction", direction.as_str()),
                );
                return Ok(SymbolTransformResult::all_failed(symbols, elapsed_ms));
            }
        };

        let mut mapped = Vec::with_capacity(symbols.len());
        let mut details = HashMap::with_capacity(symbols.len());
        let mut failed = Vec::new();
        for s in symbols {
            match pairs.get(s) {
                Some(out) => {
                    mapped.push(out.clone());
                    details.insert(s.clone(), out.clone());
                }
                None => failed.push(s.clone()),
            }
        }

        let metadata = TransformMetadata {
            total_symbols: symbols.len(),
            success_count: mapped.len(),
            failed_count: failed.len(),
            elapsed_ms,
        };
        debug!(
            target = "quotehub::symbols",
            provider = provider.name(),
            total = metadata.total_symbols,
            failed = metadata.failed_count,
            elapsed_ms,
            "bulk symbol translation complete"
        );

        Ok(SymbolTransformResult {
            mapped,
            details,
            failed,
            metadata,
        })
    }

    /// Translate one symbol; mapping gaps and upstream failures return the
    /// input unchanged.
    ///
    /// # Errors
    /// Only validation failures error.
    pub async fn transform_single(
        &self,
        provider: &Arc<dyn ProviderConnector>,
        symbol: &str,
        direction: Direction,
    ) -> Result<String, BrokerError> {
        let input = vec![symbol.to_string()];
        let result = self.transform(provider, &input, direction).await?;
        Ok(result
            .details
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| symbol.to_string()))
    }

    /// Prepare symbols for a provider fetch: standard-form symbols pass
    /// through untouched, the rest go through the bulk mapper.
    ///
    /// An empty input yields an empty envelope: no work was implied.
    ///
    /// # Errors
    /// Only validation failures from the bulk translation error.
    pub async fn transform_for_provider(
        &self,
        provider: &Arc<dyn ProviderConnector>,
        symbols: &[String],
    ) -> Result<ProviderSymbols, BrokerError> {
        if symbols.is_empty() {
            return Ok(ProviderSymbols {
                symbols: Vec::new(),
                mapping: HashMap::new(),
            });
        }

        let needs_mapping: Vec<String> = symbols
            .iter()
            .filter(|s| infer_market_for_symbol(s) == Market::Unknown)
            .cloned()
            .collect();

        let mapping = if needs_mapping.is_empty() {
            HashMap::new()
        } else {
            self.transform(provider, &needs_mapping, Direction::FromStandard)
                .await?
                .details
        };

        let symbols = symbols
            .iter()
            .map(|s| mapping.get(s).cloned().unwrap_or_else(|| s.clone()))
            .collect();
        Ok(ProviderSymbols { symbols, mapping })
    }
}
