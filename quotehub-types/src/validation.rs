//! Explicit request validators.
//!
//! Each request shape has a validator returning a structured report instead
//! of decorator-driven checks: errors fail the request, warnings are logged
//! and the request proceeds.

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::request::DataRequest;

/// Largest symbol batch accepted by a single translation call.
pub const MAX_BATCH_SIZE: usize = 1_000;
/// Longest accepted symbol string.
pub const MAX_SYMBOL_LENGTH: usize = 50;

/// Outcome of validating a request shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Conditions that fail the request.
    pub errors: Vec<String>,
    /// Conditions worth logging that do not fail the request.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// True when no errors were recorded.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into a `Validation` error when any error was recorded.
    ///
    /// # Errors
    /// Returns the joined error messages when the report is invalid.
    pub fn into_result(self) -> Result<Vec<String>, BrokerError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(BrokerError::validation(self.errors.join("; ")))
        }
    }
}

/// Validate a symbol list against size and shape limits.
///
/// Duplicates and surrounding whitespace are warnings; emptiness, oversized
/// batches, and malformed entries are errors.
#[must_use]
pub fn validate_symbols(symbols: &[String]) -> ValidationReport {
    let mut report = ValidationReport::default();

    if symbols.is_empty() {
        report.errors.push("symbols must not be empty".to_string());
        return report;
    }
    if symbols.len() > MAX_BATCH_SIZE {
        report.errors.push(format!(
            "too many symbols: {} exceeds the limit of {MAX_BATCH_SIZE}",
            symbols.len()
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for s in symbols {
        if s.trim().is_empty() {
            report.errors.push("symbols must be non-empty strings".to_string());
        } else if s.len() > MAX_SYMBOL_LENGTH {
            let prefix: String = s.chars().take(MAX_SYMBOL_LENGTH).collect();
            report.errors.push(format!(
                "symbol '{prefix}…' exceeds {MAX_SYMBOL_LENGTH} characters"
            ));
        }
        if s.trim() != s {
            report
                .warnings
                .push(format!("symbol '{s}' has surrounding whitespace"));
        }
        if !seen.insert(s.trim().to_string()) {
            report.warnings.push(format!("duplicate symbol '{s}'"));
        }
    }
    report
}

/// Validate a single-shot data request.
#[must_use]
pub fn validate_data_request(req: &DataRequest) -> ValidationReport {
    let mut report = validate_symbols(&req.symbols);
    if req.receiver_type.trim().is_empty() {
        report
            .errors
            .push("receiverType must not be empty".to_string());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn empty_symbol_list_is_an_error() {
        let r = validate_symbols(&[]);
        assert!(!r.valid());
    }

    #[test]
    fn duplicates_and_whitespace_are_warnings_only() {
        let r = validate_symbols(&strings(&["AAPL", "AAPL", " 700.HK "]));
        assert!(r.valid());
        assert_eq!(r.warnings.len(), 2);
    }

    #[test]
    fn oversized_symbol_is_an_error() {
        let r = validate_symbols(&[String::from_utf8(vec![b'A'; 51]).unwrap()]);
        assert!(!r.valid());
    }

    #[test]
    fn missing_receiver_type_fails_the_request() {
        let req = DataRequest::new(strings(&["AAPL"]), "  ");
        let r = validate_data_request(&req);
        assert!(!r.valid());
        assert!(r.into_result().is_err());
    }
}
