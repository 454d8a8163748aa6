//! Media references and deferred media retrieval.
//!
//! Photos and videos are never downloaded at ingestion time. Instead the
//! record stores a [`MediaReference`] (JSON) holding everything the protocol
//! needs to fetch and decrypt the blob later. Retrieval looks the record up
//! by id and asks the owning session's client to download it.

use std::{str::FromStr, sync::Arc};

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    chatmap_logstore::{LogStore, StreamId},
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{
    error::MediaError, pipeline::partition_for, protocol::MediaMetadata,
    registry::SessionRegistry,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

impl MediaKind {
    /// Map a requested file extension to a media kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Image),
            "mp4" => Some(Self::Video),
            _ => None,
        }
    }

    /// Canonical extension used in `file` record fields.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Video => "mp4",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Video => "video/mp4",
        }
    }

    /// Record field holding the reference for this kind.
    pub fn field(self) -> &'static str {
        match self {
            Self::Image => "photo",
            Self::Video => "video",
        }
    }
}

/// Serialized pointer to a media blob on the protocol's servers.
///
/// Field names follow the wire format already present in stored logs;
/// byte fields are base64 (standard alphabet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    #[serde(rename = "Kind", default)]
    pub kind: MediaKind,
    #[serde(rename = "MediaKey")]
    pub media_key: String,
    #[serde(rename = "DirectPath")]
    pub direct_path: String,
    #[serde(rename = "FileSHA256")]
    pub file_sha256: String,
    #[serde(rename = "FileEncSHA256", default)]
    pub file_enc_sha256: String,
    #[serde(rename = "FileLength")]
    pub file_length: u64,
    #[serde(rename = "Mimetype")]
    pub mimetype: String,
}

impl MediaReference {
    pub fn from_metadata(kind: MediaKind, media: &MediaMetadata) -> Self {
        Self {
            kind,
            media_key: STANDARD.encode(&media.media_key),
            direct_path: media.direct_path.clone(),
            file_sha256: STANDARD.encode(&media.file_sha256),
            file_enc_sha256: STANDARD.encode(&media.file_enc_sha256),
            file_length: media.file_length,
            mimetype: media.mimetype.clone(),
        }
    }

    pub fn encode(&self) -> Result<String, MediaError> {
        serde_json::to_string(self).map_err(|e| MediaError::MalformedReference(e.to_string()))
    }

    pub fn decode(encoded: &str) -> Result<Self, MediaError> {
        serde_json::from_str(encoded).map_err(|e| MediaError::MalformedReference(e.to_string()))
    }

    /// Decode the byte fields back into download metadata.
    pub fn to_metadata(&self) -> Result<MediaMetadata, MediaError> {
        let bytes = |field: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| MediaError::MalformedReference(format!("{field}: {e}")))
        };
        Ok(MediaMetadata {
            media_key: bytes("MediaKey", &self.media_key)?,
            direct_path: self.direct_path.clone(),
            file_sha256: bytes("FileSHA256", &self.file_sha256)?,
            file_enc_sha256: bytes("FileEncSHA256", &self.file_enc_sha256)?,
            file_length: self.file_length,
            mimetype: self.mimetype.clone(),
        })
    }
}

/// Split `<record-id>.<ext>` into a record id and media kind.
pub fn parse_media_file(file_name: &str) -> Result<(StreamId, MediaKind), MediaError> {
    let (stem, ext) = file_name
        .rsplit_once('.')
        .ok_or_else(|| MediaError::InvalidFileName(file_name.to_string()))?;
    let kind =
        MediaKind::from_extension(ext).ok_or_else(|| MediaError::UnsupportedExtension(ext.into()))?;
    let id = StreamId::from_str(stem).map_err(|_| MediaError::InvalidFileName(file_name.into()))?;
    Ok((id, kind))
}

/// Downloaded media bytes with their content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaContent {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

pub struct MediaRetriever {
    log: Arc<dyn LogStore>,
    registry: Arc<SessionRegistry>,
    stream_prefix: String,
}

impl MediaRetriever {
    pub fn new(
        log: Arc<dyn LogStore>,
        registry: Arc<SessionRegistry>,
        stream_prefix: impl Into<String>,
    ) -> Self {
        Self {
            log,
            registry,
            stream_prefix: stream_prefix.into(),
        }
    }

    /// Fetch the media referenced by record `file_name` (`<id>.<ext>`) in the
    /// partition of identity hash `user`.
    ///
    /// Returns `Ok(None)` when the record or its reference is absent, in which
    /// case no download is attempted.
    pub async fn fetch(
        &self,
        user: &str,
        file_name: &str,
    ) -> Result<Option<MediaContent>, MediaError> {
        let (id, kind) = parse_media_file(file_name)?;
        let partition = partition_for(&self.stream_prefix, user);

        let Some(entry) = self.log.get(&partition, id).await? else {
            debug!(%partition, %id, "media record not found");
            return Ok(None);
        };
        let encoded = entry.field(kind.field());
        if encoded.is_empty() {
            debug!(%partition, %id, field = kind.field(), "record carries no media reference");
            return Ok(None);
        }
        let metadata = match MediaReference::decode(encoded).and_then(|r| r.to_metadata()) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(%partition, %id, error = %e, "ignoring malformed media reference");
                return Ok(None);
            },
        };

        let client = self
            .registry
            .client_for_identity(user)
            .await
            .ok_or_else(|| MediaError::NoSession(user.to_string()))?;
        let bytes = client
            .download(&metadata, kind)
            .await
            .map_err(MediaError::Download)?;
        debug!(%partition, %id, size = bytes.len(), "media downloaded");
        Ok(Some(MediaContent {
            bytes,
            mime: kind.mime(),
        }))
    }
}
