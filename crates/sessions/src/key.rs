use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

const MAX_LEN: usize = 128;

/// Caller-chosen session id. It names a file on disk, so only
/// `[A-Za-z0-9_.-]` is accepted and a leading `.` is refused.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid session id {0:?}")]
pub struct InvalidSessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidSessionId> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= MAX_LEN
            && !id.starts_with('.')
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
        if valid {
            Ok(Self(id))
        } else {
            Err(InvalidSessionId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this session's credential record.
    pub fn file_name(&self) -> String {
        format!("session_{}.json", self.0)
    }

    /// Inverse of [`SessionId::file_name`].
    pub fn from_file_name(name: &str) -> Option<Self> {
        let id = name.strip_prefix("session_")?.strip_suffix(".json")?;
        Self::new(id).ok()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = InvalidSessionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = InvalidSessionId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}
