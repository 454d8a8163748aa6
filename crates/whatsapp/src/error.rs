use {
    chatmap_logstore::LogStoreError,
    chatmap_sessions::{SessionId, StoreError},
};

/// Failures reported by a protocol backend.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("media download failed: {0}")]
    Download(String),

    #[error("logout failed: {0}")]
    Logout(String),

    #[error("client disconnected")]
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("QR code for session {0} not generated in time")]
    QrTimeout(SessionId),

    #[error("session {0} is already authenticated")]
    AlreadyAuthenticated(SessionId),

    #[error("pairing of session {session} failed: {reason}")]
    PairingFailed { session: SessionId, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// Whether the supervisor should try connecting again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Protocol(ProtocolError::Connect(_)) | Self::Store(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("encryption key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("no encryption key configured (set CHATMAP_ENC_KEY)")]
    MissingKey,

    #[error("message encryption failed")]
    Encrypt,

    #[error("message decryption failed")]
    Decrypt,

    #[error("ciphertext is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// Failures while appending an inbound message to the log.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    LogStore(#[from] LogStoreError),

    #[error("no free record id left for millisecond {millis} in {partition}")]
    IdSpaceExhausted { partition: String, millis: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("invalid media file name {0:?}")]
    InvalidFileName(String),

    #[error("unsupported media extension {0:?}")]
    UnsupportedExtension(String),

    #[error("malformed media reference: {0}")]
    MalformedReference(String),

    #[error("no connected session for user {0}")]
    NoSession(String),

    #[error(transparent)]
    Download(ProtocolError),

    #[error(transparent)]
    LogStore(#[from] LogStoreError),
}
