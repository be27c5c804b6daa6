use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quotehub_types::{BrokerError, CachedRecord, Market, StorageClassification};

/// Tags carried alongside a persisted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMeta {
    /// Standard symbols the payload covers.
    pub symbols: Vec<String>,
    /// Correlation id of the originating request.
    pub request_id: String,
    /// Instant the payload was transformed.
    pub transformed_at: DateTime<Utc>,
    /// Data classification.
    pub classification: StorageClassification,
    /// Market inferred from the first symbol.
    pub market: Market,
}

/// The narrow persistence contract the broker writes through.
///
/// The document store behind it is a collaborator; nothing here assumes a
/// schema beyond the [`CachedRecord`] envelope. Implementations must be
/// safe for concurrent use.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read one record, expired or not; freshness is the caller's call.
    async fn get(&self, key: &str) -> Result<Option<CachedRecord>, BrokerError>;

    /// Read several records in one round trip, output parallel to input.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<CachedRecord>>, BrokerError>;

    /// Write a record with optional metadata tags.
    async fn put(
        &self,
        record: CachedRecord,
        meta: Option<StorageMeta>,
    ) -> Result<(), BrokerError>;
}
