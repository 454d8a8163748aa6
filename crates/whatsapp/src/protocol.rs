//! Seam between the session layer and a WhatsApp protocol implementation.
//!
//! A [`Connector`] turns a stored [`DeviceRecord`] into a live [`Connection`]:
//! a client handle plus an ordered stream of [`ProtocolEvent`]s. The session
//! layer never speaks the wire protocol itself.

use {
    async_trait::async_trait,
    chatmap_sessions::DeviceRecord,
    chrono::{DateTime, Utc},
    std::sync::Arc,
    tokio::sync::mpsc,
};

use crate::{error::ProtocolError, media::MediaKind};

/// Chat that carries status updates. Messages there are never ingested.
pub const STATUS_BROADCAST_CHAT: &str = "status@broadcast";

/// Everything the protocol needs to download and decrypt a media blob later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMetadata {
    pub media_key: Vec<u8>,
    pub direct_path: String,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
    pub mimetype: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    /// Plain conversation text (including extended text messages).
    Text(String),
    /// Native location pin.
    Location { latitude: f64, longitude: f64 },
    Image(MediaMetadata),
    Video(MediaMetadata),
    /// Anything else the protocol delivers (stickers, reactions, calls...).
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Protocol message id, used for logging only.
    pub id: String,
    pub sender: String,
    pub chat: String,
    pub timestamp: DateTime<Utc>,
    pub payload: MessagePayload,
}

impl InboundMessage {
    pub fn is_status_broadcast(&self) -> bool {
        self.chat == STATUS_BROADCAST_CHAT
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// A fresh pairing code to render as QR. Replaces the previous one.
    QrCode(String),
    /// The account was linked; `identity` is the raw account identifier.
    PairSuccess { identity: String },
    PairError(String),
    Message(InboundMessage),
    /// The connection is gone; no further events will follow.
    Disconnected,
}

/// Handle to a live protocol connection.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Raw account identifier, once paired.
    fn identity(&self) -> Option<String>;

    async fn download(&self, media: &MediaMetadata, kind: MediaKind)
    -> Result<Vec<u8>, ProtocolError>;

    /// Unlink the device from the account.
    async fn logout(&self) -> Result<(), ProtocolError>;

    async fn disconnect(&self);
}

pub struct Connection {
    pub client: Arc<dyn ProtocolClient>,
    pub events: mpsc::Receiver<ProtocolEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, device: &DeviceRecord) -> Result<Connection, ProtocolError>;
}
