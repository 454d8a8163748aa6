use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use {async_trait::async_trait, tracing::debug};

use crate::{
    key::SessionId,
    store::{CredentialStore, DeviceRecord, StoreError, now_ms},
};

/// Device name written into freshly created records.
pub const DEFAULT_DEVICE_NAME: &str = "ChatMap";

/// File-backed credential store: `<dir>/session_<id>.json`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `id`.
    pub fn path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    async fn write(&self, record: &DeviceRecord) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_err(&self.dir, e))?;
        let path = self.path_for(&record.session_id);
        let data = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        // Write to a sibling temp file, then rename over the record.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| io_err(&tmp, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| io_err(&tmp, e))?;
        }

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_err(&path, e))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn list(&self) -> Result<Vec<SessionId>, StoreError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.dir, e)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_err(&self.dir, e))? {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(SessionId::from_file_name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn load(&self, id: &SessionId) -> Result<Option<DeviceRecord>, StoreError> {
        let path = self.path_for(id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: path.display().to_string(),
                source,
            })
    }

    async fn open(&self, id: &SessionId) -> Result<DeviceRecord, StoreError> {
        if let Some(record) = self.load(id).await? {
            return Ok(record);
        }
        let record = DeviceRecord::new(id.clone(), DEFAULT_DEVICE_NAME);
        self.write(&record).await?;
        debug!(session = %id, "created credential record");
        Ok(record)
    }

    async fn save(&self, record: &DeviceRecord) -> Result<(), StoreError> {
        let mut record = record.clone();
        record.updated_at = now_ms();
        self.write(&record).await
    }

    async fn delete(&self, id: &SessionId) -> Result<bool, StoreError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(session = %id, "deleted credential record");
                Ok(true)
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path, e)),
        }
    }
}
