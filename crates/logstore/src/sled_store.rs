//! Embedded log store on sled: one tree per partition, keys are
//! big-endian [`StreamId`] bytes, values are postcard-encoded field maps.

use std::path::Path;

use {async_trait::async_trait, tracing::debug};

use crate::{
    id::StreamId,
    store::{Fields, LogEntry, LogStore, LogStoreError},
};

const DEFAULT_TREE: &[u8] = b"__sled__default";

pub struct SledLogStore {
    db: sled::Db,
}

impl SledLogStore {
    /// Open (or create) the database directory at `path`.
    pub fn open(path: &Path) -> Result<Self, LogStoreError> {
        let db = sled::open(path)?;
        debug!(path = %path.display(), "opened log store");
        Ok(Self { db })
    }

    /// Temporary database removed on drop, for tests.
    pub fn temporary() -> Result<Self, LogStoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Names of all partitions created so far.
    pub fn partitions(&self) -> Vec<String> {
        self.db
            .tree_names()
            .into_iter()
            .filter(|name| &name[..] != DEFAULT_TREE)
            .filter_map(|name| String::from_utf8(name.to_vec()).ok())
            .collect()
    }

    /// The tree of an existing partition. Reads must not create trees, so
    /// unknown partitions yield `None`.
    fn existing_tree(&self, partition: &str) -> Result<Option<sled::Tree>, LogStoreError> {
        let exists = self
            .db
            .tree_names()
            .iter()
            .any(|name| &name[..] == partition.as_bytes());
        if !exists {
            return Ok(None);
        }
        Ok(Some(self.db.open_tree(partition)?))
    }
}

#[async_trait]
impl LogStore for SledLogStore {
    async fn append(
        &self,
        partition: &str,
        id: StreamId,
        fields: Fields,
    ) -> Result<(), LogStoreError> {
        let tree = self.db.open_tree(partition)?;
        let value = postcard::to_allocvec(&fields)?;
        match tree.compare_and_swap(id.to_key(), None::<&[u8]>, Some(value))? {
            Ok(()) => {
                tree.flush_async().await?;
                Ok(())
            },
            Err(_) => Err(LogStoreError::IdCollision {
                partition: partition.to_string(),
                id,
            }),
        }
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
        let Some(tree) = self.existing_tree(partition)? else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        for item in tree.range(from.to_key()..=to.to_key()) {
            let (key, value) = item?;
            let Some(id) = StreamId::from_key(&key) else {
                debug!(partition, "skipping malformed log key");
                continue;
            };
            let fields: Fields = postcard::from_bytes(&value)?;
            entries.push(LogEntry { id, fields });
        }
        Ok(entries)
    }
}
