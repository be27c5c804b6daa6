use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Arithmetic or formatting operation applied to a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum TransformKind {
    /// Multiply the numeric source by `value`.
    Multiply,
    /// Divide the numeric source by `value`.
    Divide,
    /// Add `value` to the numeric source.
    Add,
    /// Subtract `value` from the numeric source.
    Subtract,
    /// Render the source as a string, rounding numerics to `value` decimals.
    Format,
    /// Provider-specific hook; passed through unchanged here.
    Custom,
    /// No transformation.
    None,
}

/// A transform operation with its operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueTransform {
    /// Operation kind.
    #[serde(rename = "type")]
    pub kind: TransformKind,
    /// Operand; interpretation depends on `kind`.
    pub value: Option<f64>,
}

/// One field-mapping rule.
///
/// Rules are owned by the data-mapper collaborator and consumed read-only:
/// the transformer resolves `source_field_path` (then `fallback_paths` in
/// order) against a raw record, applies `transform`, and writes the result
/// under `target_field`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Dot-separated path into the raw record.
    pub source_field_path: String,
    /// Output field name.
    pub target_field: String,
    /// Optional value transformation.
    pub transform: Option<ValueTransform>,
    /// Paths tried in order when the primary path is absent.
    #[serde(default)]
    pub fallback_paths: Vec<String>,
    /// Mapping confidence in `[0, 1]`.
    pub confidence: f64,
    /// Whether a missing source fails the record.
    pub required: bool,
    /// Inactive rules are skipped.
    pub active: bool,
}

impl FieldMapping {
    /// Minimal active rule copying `source` to `target` untransformed.
    #[must_use]
    pub fn direct(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_field_path: source.into(),
            target_field: target.into(),
            transform: None,
            fallback_paths: Vec::new(),
            confidence: 1.0,
            required: false,
            active: true,
        }
    }

    /// Builder: mark the rule required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Builder: attach a transform.
    #[must_use]
    pub fn with_transform(mut self, kind: TransformKind, value: Option<f64>) -> Self {
        self.transform = Some(ValueTransform { kind, value });
        self
    }

    /// Builder: attach fallback paths.
    #[must_use]
    pub fn with_fallbacks(mut self, paths: Vec<String>) -> Self {
        self.fallback_paths = paths;
        self
    }
}

/// Resolve a dot-separated path against a JSON record.
#[must_use]
pub fn resolve_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = record;
    for part in path.split('.') {
        cur = cur.get(part)?;
    }
    Some(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_resolution_descends_objects() {
        let rec = json!({"quote": {"last_done": 123.5}, "symbol": "700.HK"});
        assert_eq!(
            resolve_path(&rec, "quote.last_done"),
            Some(&json!(123.5))
        );
        assert_eq!(resolve_path(&rec, "symbol"), Some(&json!("700.HK")));
        assert_eq!(resolve_path(&rec, "quote.open"), None);
    }

    #[test]
    fn rule_serde_round_trip() {
        let rule = FieldMapping::direct("last_done", "lastPrice")
            .with_transform(TransformKind::Multiply, Some(0.001));
        let v = serde_json::to_value(&rule).unwrap();
        assert_eq!(v["transform"]["type"], "multiply");
        let back: FieldMapping = serde_json::from_value(v).unwrap();
        assert_eq!(back, rule);
        assert!(back.fallback_paths.is_empty());
    }
}
