//! In-memory table of live sessions.
//!
//! The registry owns every live session's state, client handle and task
//! handle. Each insert gets a fresh generation number so a task that outlived
//! its session (logout followed by a new start under the same id) can only
//! touch the entry it created.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    chatmap_sessions::SessionId,
    serde::Serialize,
    tokio::{sync::RwLock, task::AbortHandle},
};

use crate::protocol::ProtocolClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    Initializing,
    AwaitingScan,
    Authenticated,
    Terminated,
}

/// Externally visible status of a session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    NotFound,
    Waiting,
    /// Authenticated; carries the identity hash.
    Connected(String),
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Waiting => "waiting",
            Self::Connected(_) => "connected",
        }
    }

    /// Identity hash, empty unless connected.
    pub fn user(&self) -> &str {
        match self {
            Self::Connected(user) => user,
            Self::NotFound | Self::Waiting => "",
        }
    }
}

pub struct Session {
    pub id: SessionId,
    pub generation: u64,
    pub state: PairingState,
    /// Identity hash, set once authenticated.
    pub identity: Option<String>,
    /// Latest pairing code, only while awaiting a scan.
    pub qr_code: Option<String>,
    pub client: Option<Arc<dyn ProtocolClient>>,
    pub(crate) task: Option<AbortHandle>,
}

impl Session {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            generation: self.generation,
            state: self.state,
            identity: self.identity.clone(),
            qr_code: self.qr_code.clone(),
        }
    }
}

/// Read-only copy of a session's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    #[serde(skip)]
    pub generation: u64,
    pub state: PairingState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip)]
    pub qr_code: Option<String>,
}

impl SessionSnapshot {
    pub fn status(&self) -> SessionStatus {
        match (&self.state, &self.identity) {
            (PairingState::Authenticated, Some(identity)) => {
                SessionStatus::Connected(identity.clone())
            },
            (PairingState::Terminated, _) => SessionStatus::NotFound,
            _ => SessionStatus::Waiting,
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh `Initializing` session. Returns its generation, or
    /// `None` if the id is already live.
    pub async fn insert_new(&self, id: &SessionId) -> Option<u64> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(id) {
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        sessions.insert(id.clone(), Session {
            id: id.clone(),
            generation,
            state: PairingState::Initializing,
            identity: None,
            qr_code: None,
            client: None,
            task: None,
        });
        Some(generation)
    }

    pub async fn get(&self, id: &SessionId) -> Option<SessionSnapshot> {
        self.sessions.read().await.get(id).map(Session::snapshot)
    }

    pub async fn status(&self, id: &SessionId) -> SessionStatus {
        self.get(id)
            .await
            .map_or(SessionStatus::NotFound, |s| s.status())
    }

    /// Mutate a session in place. Returns `None` if the id is not live.
    pub async fn update<R>(&self, id: &SessionId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.write().await.get_mut(id).map(f)
    }

    /// Mutate a session only if it is still the given generation.
    pub async fn update_generation<R>(
        &self,
        id: &SessionId,
        generation: u64,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        self.sessions
            .write()
            .await
            .get_mut(id)
            .filter(|s| s.generation == generation)
            .map(f)
    }

    pub async fn remove(&self, id: &SessionId) -> Option<Session> {
        self.sessions.write().await.remove(id)
    }

    /// Remove the entry only if it is still the given generation.
    pub async fn remove_generation(&self, id: &SessionId, generation: u64) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        if sessions.get(id)?.generation != generation {
            return None;
        }
        sessions.remove(id)
    }

    /// All live sessions, ordered by id.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let mut list: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .map(Session::snapshot)
            .collect();
        list.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        list
    }

    /// Authenticated sessions bound to `identity`, excluding `except`.
    pub async fn find_by_identity(
        &self,
        identity: &str,
        except: Option<&SessionId>,
    ) -> Vec<SessionId> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.state == PairingState::Authenticated)
            .filter(|s| s.identity.as_deref() == Some(identity))
            .filter(|s| Some(&s.id) != except)
            .map(|s| s.id.clone())
            .collect()
    }

    /// Client of the authenticated session bound to `identity`.
    pub async fn client_for_identity(&self, identity: &str) -> Option<Arc<dyn ProtocolClient>> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.state == PairingState::Authenticated)
            .find(|s| s.identity.as_deref() == Some(identity))
            .and_then(|s| s.client.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
