/// Storage abstraction for the append-only message log.
use std::collections::BTreeMap;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::id::StreamId;

/// Flat field map of one log entry.
pub type Fields = BTreeMap<String, String>;

/// A single stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: StreamId,
    pub fields: Fields,
}

impl LogEntry {
    /// Field value, or `""` when the field is absent.
    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogStoreError {
    /// An entry with this id already exists in the partition.
    #[error("entry {id} already exists in {partition}")]
    IdCollision { partition: String, id: StreamId },

    #[error("log storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("log entry encoding error: {0}")]
    Encoding(#[from] postcard::Error),
}

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append an entry under `id`. Entries are immutable once written;
    /// an existing id yields [`LogStoreError::IdCollision`].
    async fn append(&self, partition: &str, id: StreamId, fields: Fields)
    -> Result<(), LogStoreError>;

    /// All entries with `from <= id <= to`, in id order.
    async fn range(
        &self,
        partition: &str,
        from: StreamId,
        to: StreamId,
    ) -> Result<Vec<LogEntry>, LogStoreError>;

    /// Exact-match lookup of one entry.
    async fn get(&self, partition: &str, id: StreamId) -> Result<Option<LogEntry>, LogStoreError> {
        Ok(self.range(partition, id, id).await?.into_iter().next())
    }
}
