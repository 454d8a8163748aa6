//! Inbound message pipeline: filter, classify, encrypt, append.

use std::sync::Arc;

use {
    chatmap_logstore::{LogStore, LogStoreError, StreamId},
    chrono::SecondsFormat,
    tracing::{debug, warn},
};

use crate::{
    crypto::{MessageCipher, hash_identifier},
    error::{CipherError, PipelineError},
    location::{find_coordinates, format_location},
    media::{MediaKind, MediaReference},
    protocol::{InboundMessage, MediaMetadata, MessagePayload},
    record::{MessageRecord, RecordContent},
};

/// Sequence numbers tried within one millisecond before giving up.
const MAX_ID_ATTEMPTS: u64 = 64;

/// Log partition of an identity hash.
pub fn partition_for(stream_prefix: &str, identity_hash: &str) -> String {
    format!("{stream_prefix}{identity_hash}")
}

pub struct MessagePipeline {
    cipher: Arc<MessageCipher>,
    log: Arc<dyn LogStore>,
    stream_prefix: String,
}

impl MessagePipeline {
    pub fn new(
        cipher: Arc<MessageCipher>,
        log: Arc<dyn LogStore>,
        stream_prefix: impl Into<String>,
    ) -> Self {
        Self {
            cipher,
            log,
            stream_prefix: stream_prefix.into(),
        }
    }

    /// Decide what, if anything, a message contributes to the log.
    ///
    /// Text with embedded coordinates becomes a location; other text is
    /// encrypted. Payloads with nothing to store yield `None`.
    pub fn classify(&self, payload: &MessagePayload) -> Result<Option<RecordContent>, CipherError> {
        let content = match payload {
            MessagePayload::Text(text) if text.is_empty() => None,
            MessagePayload::Text(text) => Some(match find_coordinates(text) {
                Some(coords) => RecordContent::Location(coords),
                None => RecordContent::Text(self.cipher.encrypt(text)?),
            }),
            MessagePayload::Location {
                latitude,
                longitude,
            } => Some(RecordContent::Location(format_location(*latitude, *longitude))),
            MessagePayload::Image(media) => {
                encode_reference(MediaKind::Image, media).map(RecordContent::Photo)
            },
            MessagePayload::Video(media) => {
                encode_reference(MediaKind::Video, media).map(RecordContent::Video)
            },
            MessagePayload::Other => None,
        };
        Ok(content)
    }

    /// Append a message received by the account with identity hash
    /// `owner`. Returns the id it was stored under, or `None` when the
    /// message was filtered out.
    ///
    /// On an id collision the sequence number is bumped, so two messages in
    /// the same millisecond are both kept.
    pub async fn ingest(
        &self,
        owner: &str,
        message: &InboundMessage,
    ) -> Result<Option<StreamId>, PipelineError> {
        if message.is_status_broadcast() {
            debug!(message_id = %message.id, "skipping status broadcast");
            return Ok(None);
        }
        let Some(content) = self.classify(&message.payload)? else {
            debug!(message_id = %message.id, "message has no storable content");
            return Ok(None);
        };

        let partition = partition_for(&self.stream_prefix, owner);
        let millis = u64::try_from(message.timestamp.timestamp_millis()).unwrap_or(0);
        let mut record = MessageRecord {
            id: StreamId::from_millis(millis),
            user: owner.to_string(),
            from: hash_identifier(&message.sender),
            chat: hash_identifier(&message.chat),
            date: message.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            content,
        };

        for _ in 0..MAX_ID_ATTEMPTS {
            match self
                .log
                .append(&partition, record.id, record.to_fields())
                .await
            {
                Ok(()) => {
                    debug!(%partition, id = %record.id, "message stored");
                    return Ok(Some(record.id));
                },
                Err(LogStoreError::IdCollision { .. }) => {
                    let Some(next) = record.id.next_seq() else {
                        break;
                    };
                    debug!(%partition, id = %record.id, "record id taken, bumping sequence");
                    record.id = next;
                },
                Err(e) => return Err(e.into()),
            }
        }
        Err(PipelineError::IdSpaceExhausted { partition, millis })
    }
}

fn encode_reference(kind: MediaKind, media: &MediaMetadata) -> Option<String> {
    match MediaReference::from_metadata(kind, media).encode() {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            warn!(error = %e, "dropping media with unencodable reference");
            None
        },
    }
}
