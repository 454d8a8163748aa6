use std::sync::Arc;

use chatmap_whatsapp::{MediaRetriever, SessionManager};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub media: Arc<MediaRetriever>,
    pub version: &'static str,
}

impl AppState {
    pub fn new(sessions: SessionManager, media: MediaRetriever) -> Self {
        Self {
            sessions,
            media: Arc::new(media),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
