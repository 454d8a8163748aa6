use {
    chatmap_logstore::{Fields, StreamId},
    serde::Serialize,
};

use crate::media::MediaKind;

/// The one content field a record carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum RecordContent {
    /// Encrypted text body.
    Text(String),
    /// `"<lat>,<lon>"`, plaintext.
    Location(String),
    /// Encoded media reference.
    Photo(String),
    Video(String),
}

impl RecordContent {
    fn media_kind(&self) -> Option<MediaKind> {
        match self {
            Self::Photo(_) => Some(MediaKind::Image),
            Self::Video(_) => Some(MediaKind::Video),
            Self::Text(_) | Self::Location(_) => None,
        }
    }
}

/// One log entry derived from an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub id: StreamId,
    /// Identity hash of the receiving account.
    pub user: String,
    pub from: String,
    pub chat: String,
    /// RFC 3339 timestamp of the message.
    pub date: String,
    pub content: RecordContent,
}

impl MessageRecord {
    /// `<id>.<ext>` for media records, empty otherwise.
    pub fn file(&self) -> String {
        self.content
            .media_kind()
            .map(|kind| format!("{}.{}", self.id, kind.extension()))
            .unwrap_or_default()
    }

    /// Flatten into the stored field map. Every field is always present so
    /// readers never have to distinguish "absent" from "empty".
    pub fn to_fields(&self) -> Fields {
        let (mut text, mut location, mut photo, mut video) =
            (String::new(), String::new(), String::new(), String::new());
        match &self.content {
            RecordContent::Text(v) => text = v.clone(),
            RecordContent::Location(v) => location = v.clone(),
            RecordContent::Photo(v) => photo = v.clone(),
            RecordContent::Video(v) => video = v.clone(),
        }
        Fields::from([
            ("id".to_string(), self.id.to_string()),
            ("user".to_string(), self.user.clone()),
            ("from".to_string(), self.from.clone()),
            ("chat".to_string(), self.chat.clone()),
            ("date".to_string(), self.date.clone()),
            ("text".to_string(), text),
            ("location".to_string(), location),
            ("photo".to_string(), photo),
            ("video".to_string(), video),
            ("file".to_string(), self.file()),
        ])
    }
}
