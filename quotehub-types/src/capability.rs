use core::fmt;
use serde::{Deserialize, Serialize};

/// High-level capability labels for routing, errors, and telemetry.
///
/// These map one-to-one with the request surfaces (`receiver_type` on the
/// REST side, `ws_capability_type` on the streaming side) and allow
/// consistent Display formatting and match-exhaustive handling when adding
/// new capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Capability {
    /// Point-in-time stock quote.
    GetStockQuote,
    /// Static instrument descriptors (name, lot size, currency).
    GetStockBasicInfo,
    /// Historical candles.
    GetStockHistory,
    /// Point-in-time index quote.
    GetIndexQuote,
    /// Market trading status.
    GetMarketStatus,
    /// Streaming: stock quote updates.
    StreamStockQuote,
    /// Streaming: instrument descriptor updates.
    StreamStockBasicInfo,
}

impl Capability {
    /// Stable, kebab-case identifier for logs, errors, and storage keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetStockQuote => "get-stock-quote",
            Self::GetStockBasicInfo => "get-stock-basic-info",
            Self::GetStockHistory => "get-stock-history",
            Self::GetIndexQuote => "get-index-quote",
            Self::GetMarketStatus => "get-market-status",
            Self::StreamStockQuote => "stream-stock-quote",
            Self::StreamStockBasicInfo => "stream-stock-basic-info",
        }
    }

    /// Parse a wire identifier back into a capability.
    ///
    /// `get-stock-realtime` is accepted as a legacy alias of
    /// `get-stock-quote`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "get-stock-quote" | "get-stock-realtime" => Some(Self::GetStockQuote),
            "get-stock-basic-info" => Some(Self::GetStockBasicInfo),
            "get-stock-history" => Some(Self::GetStockHistory),
            "get-index-quote" => Some(Self::GetIndexQuote),
            "get-market-status" => Some(Self::GetMarketStatus),
            "stream-stock-quote" => Some(Self::StreamStockQuote),
            "stream-stock-basic-info" => Some(Self::StreamStockBasicInfo),
            _ => None,
        }
    }

    /// Whether this capability is served over the streaming surface.
    #[must_use]
    pub const fn is_streaming(self) -> bool {
        matches!(self, Self::StreamStockQuote | Self::StreamStockBasicInfo)
    }

    /// Field-mapping rule list consulted when transforming raw records for
    /// this capability.
    #[must_use]
    pub const fn rule_list_type(self) -> RuleListType {
        match self {
            Self::GetStockQuote | Self::GetStockHistory | Self::StreamStockQuote => {
                RuleListType::QuoteFields
            }
            Self::GetStockBasicInfo | Self::StreamStockBasicInfo => RuleListType::BasicInfoFields,
            Self::GetIndexQuote => RuleListType::IndexFields,
            Self::GetMarketStatus => RuleListType::MarketStatusFields,
        }
    }

    /// Storage classification applied when persisting transformed records.
    #[must_use]
    pub const fn storage_classification(self) -> StorageClassification {
        match self {
            Self::GetStockQuote | Self::StreamStockQuote => StorageClassification::StockQuote,
            Self::GetStockBasicInfo | Self::StreamStockBasicInfo => {
                StorageClassification::StockBasicInfo
            }
            Self::GetStockHistory => StorageClassification::StockCandle,
            Self::GetIndexQuote => StorageClassification::IndexQuote,
            Self::GetMarketStatus => StorageClassification::MarketStatus,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which ordered list of field mappings applies to a raw record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum RuleListType {
    /// Quote-shaped payloads (prices, volumes).
    QuoteFields,
    /// Static descriptor payloads.
    BasicInfoFields,
    /// Index quote payloads.
    IndexFields,
    /// Market status payloads.
    MarketStatusFields,
}

impl RuleListType {
    /// Stable identifier used in rule lookups and telemetry.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QuoteFields => "quote_fields",
            Self::BasicInfoFields => "basic_info_fields",
            Self::IndexFields => "index_fields",
            Self::MarketStatusFields => "market_status_fields",
        }
    }
}

impl fmt::Display for RuleListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted-data classification recorded in storage metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum StorageClassification {
    /// Point-in-time stock quotes.
    StockQuote,
    /// Instrument descriptors.
    StockBasicInfo,
    /// Historical candles.
    StockCandle,
    /// Index quotes.
    IndexQuote,
    /// Market status snapshots.
    MarketStatus,
}

impl StorageClassification {
    /// Stable identifier stored alongside persisted records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StockQuote => "stock_quote",
            Self::StockBasicInfo => "stock_basic_info",
            Self::StockCandle => "stock_candle",
            Self::IndexQuote => "index_quote",
            Self::MarketStatus => "market_status",
        }
    }
}

/// Transport surface a provider request travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiType {
    /// Single-shot request/response.
    Rest,
    /// Long-lived streaming connection.
    Stream,
}

impl ApiType {
    /// Stable identifier for rule lookups.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Stream => "stream",
        }
    }
}
