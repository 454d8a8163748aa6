use std::collections::{BTreeMap, HashMap};

use {async_trait::async_trait, tokio::sync::RwLock};

use crate::{
    id::StreamId,
    store::{Fields, LogEntry, LogStore, LogStoreError},
};

/// In-process log store, used by tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryLogStore {
    partitions: RwLock<HashMap<String, BTreeMap<StreamId, Fields>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry of a partition, in id order.
    pub async fn entries(&self, partition: &str) -> Vec<LogEntry> {
        self.partitions
            .read()
            .await
            .get(partition)
            .map(|p| {
                p.iter()
                    .map(|(id, fields)| LogEntry {
                        id: *id,
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Names of all partitions that hold at least one entry.
    pub async fn partitions(&self) -> Vec<String> {
        let mut names: Vec<_> = self.partitions.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(
        &self,
        partition: &str,
        id: StreamId,
        fields: Fields,
    ) -> Result<(), LogStoreError> {
        let mut partitions = self.partitions.write().await;
        let entries = partitions.entry(partition.to_string()).or_default();
        if entries.contains_key(&id) {
            return Err(LogStoreError::IdCollision {
                partition: partition.to_string(),
                id,
            });
        }
        entries.insert(id, fields);
        Ok(())
    }

    async fn range(
        &self,
        partition: &str,
        from: StreamId,
        to: StreamId,
    ) -> Result<Vec<LogEntry>, LogStoreError> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self
            .partitions
            .read()
            .await
            .get(partition)
            .map(|p| {
                p.range(from..=to)
                    .map(|(id, fields)| LogEntry {
                        id: *id,
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
