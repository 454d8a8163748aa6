use std::time::{SystemTime, UNIX_EPOCH};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::key::SessionId;

/// Durable per-session device record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub session_id: SessionId,
    /// Raw account identifier, set once pairing succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Device name announced to the network.
    #[serde(default)]
    pub device_name: String,
    pub created_at: u64,
    pub updated_at: u64,
    /// Backend-specific key material; opaque to the connector.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub protocol_state: serde_json::Value,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl DeviceRecord {
    pub fn new(session_id: SessionId, device_name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            session_id,
            identity: None,
            device_name: device_name.into(),
            created_at: now,
            updated_at: now,
            protocol_state: serde_json::Value::Null,
        }
    }

    /// Whether the record carries an authenticated identity.
    pub fn has_identity(&self) -> bool {
        self.identity.as_deref().is_some_and(|i| !i.is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("credential store I/O error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt credential record {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted device credentials, one record per session id.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Ids of every persisted record.
    async fn list(&self) -> Result<Vec<SessionId>, StoreError>;

    /// Read a record without creating it.
    async fn load(&self, id: &SessionId) -> Result<Option<DeviceRecord>, StoreError>;

    /// Read a record, creating an empty one if none exists.
    async fn open(&self, id: &SessionId) -> Result<DeviceRecord, StoreError>;

    /// Write a record, replacing any previous version.
    async fn save(&self, record: &DeviceRecord) -> Result<(), StoreError>;

    /// Remove a record. Returns whether anything was removed; a missing
    /// record is not an error.
    async fn delete(&self, id: &SessionId) -> Result<bool, StoreError>;

    /// Lightweight probe: does the persisted record hold a valid identity?
    async fn has_identity(&self, id: &SessionId) -> Result<bool, StoreError> {
        Ok(self
            .load(id)
            .await?
            .is_some_and(|record| record.has_identity()))
    }
}
