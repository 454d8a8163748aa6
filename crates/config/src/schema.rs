/// Config schema types (server, sessions, log store, encryption).
use std::path::PathBuf;

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize, Serializer},
};

/// Environment variable holding the message encryption key.
pub const ENC_KEY_ENV: &str = "CHATMAP_ENC_KEY";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatmapConfig {
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub log_store: LogStoreConfig,
    pub encryption: EncryptionConfig,
}

impl ChatmapConfig {
    /// Apply environment overrides that take precedence over file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    pub(crate) fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(ENC_KEY_ENV).filter(|k| !k.is_empty()) {
            self.encryption.key = Some(Secret::new(key));
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8001,
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Directory holding one credential file per session.
    pub dir: PathBuf,
    /// How long `/start-qr` waits for a QR payload.
    pub qr_timeout_ms: u64,
    /// How often `/start-qr` polls for the QR payload.
    pub qr_poll_interval_ms: u64,
    /// Connection attempts before a session is dropped by its supervisor.
    pub pairing_attempts: u32,
    /// Delay between connection attempts.
    pub pairing_backoff_ms: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("sessions"),
            qr_timeout_ms: 10_000,
            qr_poll_interval_ms: 100,
            pairing_attempts: 3,
            pairing_backoff_ms: 2_000,
        }
    }
}

/// Append-only message log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogStoreConfig {
    /// Directory of the embedded log database.
    pub path: PathBuf,
    /// Prefix prepended to the identity hash to form a partition name.
    pub stream_prefix: String,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/messages"),
            stream_prefix: "messages:".into(),
        }
    }
}

/// Message text encryption settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// 32-byte key. `CHATMAP_ENC_KEY` overrides the file value.
    #[serde(serialize_with = "serialize_redacted")]
    pub key: Option<Secret<String>>,
    /// Fall back to the well-known development key when no key is set.
    pub allow_insecure_default_key: bool,
}

fn serialize_redacted<S: Serializer>(
    value: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(_) => serializer.serialize_some("[REDACTED]"),
        None => serializer.serialize_none(),
    }
}
