//! In-process protocol backend.
//!
//! Nothing leaves the process: pairing codes are generated locally, and
//! pairing, inbound messages and disconnects are injected through the
//! connector's methods. Used by the test suite and by local runs without a
//! network backend.

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use {
    async_trait::async_trait,
    chatmap_sessions::{DeviceRecord, SessionId},
    dashmap::DashMap,
    tokio::sync::mpsc,
    tracing::debug,
};

use crate::{
    error::ProtocolError,
    media::MediaKind,
    protocol::{
        Connection, Connector, InboundMessage, MediaMetadata, ProtocolClient, ProtocolEvent,
    },
};

const EVENT_BUFFER: usize = 64;

#[derive(Default)]
struct Shared {
    senders: DashMap<SessionId, mpsc::Sender<ProtocolEvent>>,
    clients: DashMap<SessionId, Arc<LoopbackClient>>,
    /// Identities reported on connect, as if the account was linked already.
    preauthorized: DashMap<SessionId, String>,
    /// Media blobs by direct path.
    media: DashMap<String, Vec<u8>>,
    logouts: DashMap<SessionId, usize>,
    disconnects: DashMap<SessionId, usize>,
    connects: AtomicUsize,
    downloads: AtomicUsize,
    failing_connects: AtomicUsize,
    manual_qr: AtomicBool,
}

#[derive(Clone, Default)]
pub struct LoopbackConnector {
    shared: Arc<Shared>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not emit a pairing code on connect; tests push them with
    /// [`Self::emit_qr`].
    pub fn with_manual_qr(self) -> Self {
        self.shared.manual_qr.store(true, Ordering::Relaxed);
        self
    }

    /// Report `identity` as already linked when `session` connects.
    pub fn preauthorize(&self, session: &SessionId, identity: impl Into<String>) {
        self.shared
            .preauthorized
            .insert(session.clone(), identity.into());
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Make `bytes` downloadable under `direct_path`.
    pub fn add_media(&self, direct_path: impl Into<String>, bytes: Vec<u8>) {
        self.shared.media.insert(direct_path.into(), bytes);
    }

    pub fn is_connected(&self, session: &SessionId) -> bool {
        self.shared.senders.contains_key(session)
    }

    pub async fn emit(&self, session: &SessionId, event: ProtocolEvent) -> bool {
        let Some(tx) = self.shared.senders.get(session).map(|tx| tx.value().clone()) else {
            return false;
        };
        tx.send(event).await.is_ok()
    }

    pub async fn emit_qr(&self, session: &SessionId, code: impl Into<String>) -> bool {
        self.emit(session, ProtocolEvent::QrCode(code.into())).await
    }

    /// Simulate a successful scan by the account `identity`.
    pub async fn pair(&self, session: &SessionId, identity: &str) -> bool {
        if let Some(client) = self.shared.clients.get(session) {
            let _ = client.identity.set(identity.to_string());
        }
        self.emit(session, ProtocolEvent::PairSuccess {
            identity: identity.to_string(),
        })
        .await
    }

    pub async fn deliver(&self, session: &SessionId, message: InboundMessage) -> bool {
        self.emit(session, ProtocolEvent::Message(message)).await
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.shared.downloads.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self, session: &SessionId) -> usize {
        self.shared.logouts.get(session).map_or(0, |n| *n)
    }

    pub fn disconnect_count(&self, session: &SessionId) -> usize {
        self.shared.disconnects.get(session).map_or(0, |n| *n)
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, device: &DeviceRecord) -> Result<Connection, ProtocolError> {
        let shared = &self.shared;
        shared.connects.fetch_add(1, Ordering::SeqCst);
        let failing = shared
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(ProtocolError::Connect("loopback connection refused".into()));
        }

        let session = device.session_id.clone();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let client = Arc::new(LoopbackClient {
            session: session.clone(),
            identity: OnceLock::new(),
            shared: Arc::clone(shared),
        });
        let identity = device
            .identity
            .clone()
            .filter(|i| !i.is_empty())
            .or_else(|| shared.preauthorized.get(&session).map(|i| i.value().clone()));
        if let Some(identity) = identity {
            let _ = client.identity.set(identity);
        } else if !shared.manual_qr.load(Ordering::Relaxed) {
            let code = format!("loopback@{session}#{}", shared.connects.load(Ordering::SeqCst));
            let _ = tx.try_send(ProtocolEvent::QrCode(code));
        }

        shared.senders.insert(session.clone(), tx);
        shared.clients.insert(session.clone(), Arc::clone(&client));
        debug!(%session, "loopback connected");
        Ok(Connection {
            client,
            events: rx,
        })
    }
}

pub struct LoopbackClient {
    session: SessionId,
    identity: OnceLock<String>,
    shared: Arc<Shared>,
}

#[async_trait]
impl ProtocolClient for LoopbackClient {
    fn identity(&self) -> Option<String> {
        self.identity.get().cloned()
    }

    async fn download(
        &self,
        media: &MediaMetadata,
        _kind: MediaKind,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.shared.downloads.fetch_add(1, Ordering::SeqCst);
        self.shared
            .media
            .get(&media.direct_path)
            .map(|bytes| bytes.value().clone())
            .ok_or_else(|| ProtocolError::Download(format!("no media at {}", media.direct_path)))
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        *self.shared.logouts.entry(self.session.clone()).or_default() += 1;
        Ok(())
    }

    async fn disconnect(&self) {
        *self
            .shared
            .disconnects
            .entry(self.session.clone())
            .or_default() += 1;
        // Only drop the channel if it still belongs to this client.
        let ours = self
            .shared
            .clients
            .get(&self.session)
            .is_some_and(|c| std::ptr::eq(Arc::as_ptr(c.value()), self));
        if ours {
            self.shared.clients.remove(&self.session);
            self.shared.senders.remove(&self.session);
        }
    }
}
