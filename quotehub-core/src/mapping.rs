use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Number, Value};
use tracing::debug;

use quotehub_types::rules::resolve_path;
use quotehub_types::{ApiType, BrokerError, FieldMapping, RuleListType, TransformKind};

/// Read-only source of field-mapping rules.
///
/// Rules are owned by the data-mapper collaborator; the broker only looks
/// them up by `(provider, api_type, rule_list_type)`.
pub trait RuleSource: Send + Sync {
    /// Ordered mapping rules for the given lookup key, if any exist.
    fn rules(
        &self,
        provider: &str,
        api_type: ApiType,
        list: RuleListType,
    ) -> Option<Arc<Vec<FieldMapping>>>;
}

/// Simple in-memory rule source keyed on `(provider, api_type, list)`.
#[derive(Default)]
pub struct InMemoryRuleSource {
    rules: HashMap<(String, ApiType, RuleListType), Arc<Vec<FieldMapping>>>,
}

impl InMemoryRuleSource {
    /// Empty source; populate with [`insert`](Self::insert).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule list.
    pub fn insert(
        &mut self,
        provider: impl Into<String>,
        api_type: ApiType,
        list: RuleListType,
        rules: Vec<FieldMapping>,
    ) {
        self.rules
            .insert((provider.into(), api_type, list), Arc::new(rules));
    }
}

impl RuleSource for InMemoryRuleSource {
    fn rules(
        &self,
        provider: &str,
        api_type: ApiType,
        list: RuleListType,
    ) -> Option<Arc<Vec<FieldMapping>>> {
        self.rules
            .get(&(provider.to_string(), api_type, list))
            .cloned()
    }
}

/// Applies field-mapping rule lists to raw provider records.
pub struct RecordTransformer {
    rules: Arc<dyn RuleSource>,
}

impl RecordTransformer {
    /// Transformer over the given rule source.
    #[must_use]
    pub fn new(rules: Arc<dyn RuleSource>) -> Self {
        Self { rules }
    }

    /// Transform a batch of raw records.
    ///
    /// # Errors
    /// `Transform` when no rule list exists for the lookup key or when any
    /// record fails a required mapping. Callers wanting per-record fallback
    /// use [`transform_record`](Self::transform_record) directly.
    pub fn transform_records(
        &self,
        provider: &str,
        api_type: ApiType,
        list: RuleListType,
        records: &[Value],
    ) -> Result<Vec<Value>, BrokerError> {
        let rules = self.rules_for(provider, api_type, list)?;
        records
            .iter()
            .map(|r| apply_mappings(&rules, r))
            .collect()
    }

    /// Transform one raw record.
    ///
    /// # Errors
    /// `Transform` when no rule list exists or a required mapping fails.
    pub fn transform_record(
        &self,
        provider: &str,
        api_type: ApiType,
        list: RuleListType,
        record: &Value,
    ) -> Result<Value, BrokerError> {
        let rules = self.rules_for(provider, api_type, list)?;
        apply_mappings(&rules, record)
    }

    fn rules_for(
        &self,
        provider: &str,
        api_type: ApiType,
        list: RuleListType,
    ) -> Result<Arc<Vec<FieldMapping>>, BrokerError> {
        self.rules.rules(provider, api_type, list).ok_or_else(|| {
            BrokerError::transform(format!(
                "no {list} rules for {provider}/{}",
                api_type.as_str()
            ))
        })
    }
}

/// Apply an ordered rule list to one raw record.
///
/// Inactive rules are skipped. A missing source resolves through the
/// fallback paths in order; still missing fails the record only when the
/// rule is required.
///
/// # Errors
/// `Transform` on a missing required source or an invalid numeric
/// operation (non-numeric source, division by zero).
pub fn apply_mappings(rules: &[FieldMapping], record: &Value) -> Result<Value, BrokerError> {
    let mut out = Map::new();
    for rule in rules.iter().filter(|r| r.active) {
        let source = resolve_path(record, &rule.source_field_path).or_else(|| {
            rule.fallback_paths
                .iter()
                .find_map(|p| resolve_path(record, p))
        });
        let Some(source) = source else {
            if rule.required {
                return Err(BrokerError::transform(format!(
                    "required field '{}' missing from record",
                    rule.source_field_path
                )));
            }
            debug!(
                target = "quotehub::mapping",
                source = %rule.source_field_path,
                "optional field missing; skipped"
            );
            continue;
        };
        let value = match &rule.transform {
            Some(t) => apply_transform(t.kind, t.value, source, &rule.source_field_path)?,
            None => source.clone(),
        };
        out.insert(rule.target_field.clone(), value);
    }
    Ok(Value::Object(out))
}

fn apply_transform(
    kind: TransformKind,
    operand: Option<f64>,
    source: &Value,
    path: &str,
) -> Result<Value, BrokerError> {
    match kind {
        TransformKind::None | TransformKind::Custom => Ok(source.clone()),
        TransformKind::Format => {
            let rendered = match (source.as_f64(), operand) {
                (Some(n), Some(decimals)) => {
                    format!("{n:.prec$}", prec = decimals.max(0.0) as usize)
                }
                (Some(n), None) => n.to_string(),
                (None, _) => match source {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
            };
            Ok(Value::String(rendered))
        }
        TransformKind::Multiply | TransformKind::Divide | TransformKind::Add
        | TransformKind::Subtract => {
            let lhs = source.as_f64().ok_or_else(|| {
                BrokerError::transform(format!("field '{path}' is not numeric"))
            })?;
            let rhs = operand.ok_or_else(|| {
                BrokerError::transform(format!("transform on '{path}' has no operand"))
            })?;
            let result = match kind {
                TransformKind::Multiply => lhs * rhs,
                TransformKind::Divide => {
                    if rhs == 0.0 {
                        return Err(BrokerError::transform(format!(
                            "division by zero on '{path}'"
                        )));
                    }
                    lhs / rhs
                }
                TransformKind::Add => lhs + rhs,
                TransformKind::Subtract => lhs - rhs,
                _ => unreachable!(),
            };
            Number::from_f64(result)
                .map(Value::Number)
                .ok_or_else(|| {
                    BrokerError::transform(format!("non-finite result on '{path}'"))
                })
        }
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quote_rules() -> Vec<FieldMapping> {
        vec![
            FieldMapping::direct("symbol", "symbol").required(),
            FieldMapping::direct("last_done", "lastPrice")
                .with_fallbacks(vec!["price.last".to_string()]),
            FieldMapping::direct("turnover", "turnover")
                .with_transform(TransformKind::Divide, Some(1_000.0)),
        ]
    }

    #[test]
    fn maps_with_fallback_paths() {
        let record = json!({"symbol": "700.HK", "price": {"last": 321.5}, "turnover": 2_500.0});
        let out = apply_mappings(&quote_rules(), &record).unwrap();
        assert_eq!(out["symbol"], "700.HK");
        assert_eq!(out["lastPrice"], 321.5);
        assert_eq!(out["turnover"], 2.5);
    }

    #[test]
    fn missing_required_field_fails_the_record() {
        let record = json!({"last_done": 1.0});
        let err = apply_mappings(&quote_rules(), &record).unwrap_err();
        assert!(matches!(err, BrokerError::Transform(_)));
    }

    #[test]
    fn missing_optional_field_is_skipped() {
        let record = json!({"symbol": "AAPL"});
        let out = apply_mappings(&quote_rules(), &record).unwrap();
        assert_eq!(out["symbol"], "AAPL");
        assert!(out.get("lastPrice").is_none());
    }

    #[test]
    fn division_by_zero_is_a_transform_error() {
        let rules = vec![
            FieldMapping::direct("v", "v").with_transform(TransformKind::Divide, Some(0.0)),
        ];
        let err = apply_mappings(&rules, &json!({"v": 1.0})).unwrap_err();
        assert!(matches!(err, BrokerError::Transform(_)));
    }

    #[test]
    fn format_rounds_numerics() {
        let rules = vec![
            FieldMapping::direct("v", "v").with_transform(TransformKind::Format, Some(2.0)),
        ];
        let out = apply_mappings(&rules, &json!({"v": 1.2345})).unwrap();
        assert_eq!(out["v"], "1.23");
    }

    #[test]
    fn inactive_rules_are_skipped() {
        let mut rule = FieldMapping::direct("v", "v");
        rule.active = false;
        let out = apply_mappings(&[rule], &json!({"v": 1.0})).unwrap();
        assert!(out.as_object().unwrap().is_empty());
    }

    #[test]
    fn transformer_batch_is_all_or_nothing_and_single_is_per_record() {
        let mut source = InMemoryRuleSource::new();
        source.insert(
            "longport",
            ApiType::Rest,
            RuleListType::QuoteFields,
            quote_rules(),
        );
        let transformer = RecordTransformer::new(std::sync::Arc::new(source));

        let good = json!({"symbol": "AAPL", "last_done": 1.0});
        let bad = json!({"last_done": 2.0});

        // The batch call fails as a whole on one bad record; callers
        // wanting per-record fallback go through transform_record.
        let records = vec![good.clone(), bad.clone()];
        assert!(
            transformer
                .transform_records("longport", ApiType::Rest, RuleListType::QuoteFields, &records)
                .is_err()
        );
        let mapped = transformer
            .transform_record("longport", ApiType::Rest, RuleListType::QuoteFields, &good)
            .unwrap();
        assert_eq!(mapped["symbol"], "AAPL");
        assert!(
            transformer
                .transform_record("longport", ApiType::Rest, RuleListType::QuoteFields, &bad)
                .is_err()
        );

        // Unknown lookup keys are a transform error, not a panic.
        let err = transformer
            .transform_record("itick", ApiType::Rest, RuleListType::QuoteFields, &good)
            .unwrap_err();
        assert!(matches!(err, BrokerError::Transform(_)));
    }
}
