use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;

use quotehub_core::connector::{ProviderConnector, SymbolMapper};
use quotehub_core::{NullMetricsBus, SymbolTransformer};
use quotehub_types::{BrokerError, Direction, Market};

/// Mapper that knows a fixed table and can be switched into fatal failure.
struct TableMapper {
    table: HashMap<String, String>,
    fail: bool,
}

#[async_trait]
impl SymbolMapper for TableMapper {
    async fn map_symbols(
        &self,
        symbols: &[String],
        _direction: Direction,
    ) -> Result<HashMap<String, String>, BrokerError> {
        if self.fail {
            return Err(BrokerError::upstream("table", "mapping backend down"));
        }
        Ok(symbols
            .iter()
            .filter_map(|s| self.table.get(s).map(|v| (s.clone(), v.clone())))
            .collect())
    }
}

struct MapperProvider {
    mapper: TableMapper,
}

impl ProviderConnector for MapperProvider {
    fn name(&self) -> &'static str {
        "table"
    }
    fn supports_market(&self, _m: Market) -> bool {
        true
    }
    fn as_symbol_mapper(&self) -> Option<&dyn SymbolMapper> {
        Some(&self.mapper)
    }
}

fn provider(fail: bool) -> Arc<dyn ProviderConnector> {
    let mut table = HashMap::new();
    table.insert("700.HK".to_string(), "00700".to_string());
    table.insert("0005.HK".to_string(), "00005".to_string());
    table.insert("AAPL".to_string(), "AAPL.US".to_string());
    Arc::new(MapperProvider {
        mapper: TableMapper { table, fail },
    })
}

fn transformer() -> SymbolTransformer {
    SymbolTransformer::new(Arc::new(NullMetricsBus))
}

#[tokio::test]
async fn bulk_transform_partitions_successes_and_failures() {
    let p = provider(false);
    let symbols = vec![
        "700.HK".to_string(),
        "NOPE.XX".to_string(),
        "AAPL".to_string(),
    ];
    let out = transformer()
        .transform(&p, &symbols, Direction::FromStandard)
        .await
        .unwrap();
    assert_eq!(out.mapped, vec!["00700", "AAPL.US"]);
    assert_eq!(out.failed, vec!["NOPE.XX"]);
    assert_eq!(out.metadata.total_symbols, 3);
    assert_eq!(out.metadata.success_count, 2);
    assert_eq!(out.metadata.failed_count, 1);
}

#[tokio::test]
async fn fatal_mapper_failure_reports_everything_failed() {
    let p = provider(true);
    let symbols = vec!["700.HK".to_string(), "AAPL".to_string()];
    let out = transformer()
        .transform(&p, &symbols, Direction::FromStandard)
        .await
        .unwrap();
    assert!(out.mapped.is_empty());
    assert_eq!(out.failed.len(), 2);
    assert_eq!(out.metadata.success_count, 0);
}

#[tokio::test]
async fn empty_symbol_list_is_a_validation_error() {
    let p = provider(false);
    let err = transformer()
        .transform(&p, &[], Direction::ToStandard)
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Validation(_)));
}

#[tokio::test]
async fn single_transform_returns_input_on_mapping_gap() {
    let p = provider(false);
    let t = transformer();
    let mapped = t
        .transform_single(&p, "700.HK", Direction::FromStandard)
        .await
        .unwrap();
    assert_eq!(mapped, "00700");
    let unmapped = t
        .transform_single(&p, "NOPE.XX", Direction::FromStandard)
        .await
        .unwrap();
    assert_eq!(unmapped, "NOPE.XX");
}

#[tokio::test]
async fn provider_preparation_passes_standard_forms_through() {
    let p = provider(false);
    let symbols = vec!["700.HK".to_string(), "AAPL".to_string()];
    let out = transformer()
        .transform_for_provider(&p, &symbols)
        .await
        .unwrap();
    // Both match standard classes, so neither touches the mapper.
    assert_eq!(out.symbols, symbols);
    assert!(out.mapping.is_empty());
}

proptest! {
    /// Transform metadata always satisfies total == success + failed.
    #[test]
    fn metadata_totals_balance(symbols in proptest::collection::vec("[A-Z0-9.]{1,10}", 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let p = provider(false);
        let out = rt
            .block_on(transformer().transform(&p, &symbols, Direction::FromStandard))
            .unwrap();
        prop_assert_eq!(
            out.metadata.total_symbols,
            out.metadata.success_count + out.metadata.failed_count
        );
        prop_assert_eq!(out.metadata.success_count, out.mapped.len());
        prop_assert_eq!(out.metadata.failed_count, out.failed.len());
    }
}
