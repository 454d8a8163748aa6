//! Session lifecycle: start, pairing, identity deduplication and logout.
//!
//! Every session runs one supervisor task. The task connects through the
//! [`Connector`], then consumes the connection's events strictly in order,
//! so state transitions and message appends of a session never race each
//! other. Connection failures are retried a bounded number of times; after
//! that the session is dropped from the registry while its credential
//! record is kept for the next start.

use std::{sync::Arc, time::Duration};

use {
    chatmap_sessions::{CredentialStore, SessionId, StoreError},
    dashmap::DashMap,
    tokio::{
        sync::Mutex,
        time::{Instant, MissedTickBehavior},
    },
    tracing::{debug, error, info, warn},
};

use crate::{
    crypto::hash_identifier,
    error::{ProtocolError, SessionError},
    pipeline::MessagePipeline,
    protocol::{Connection, Connector, InboundMessage, ProtocolEvent},
    registry::{PairingState, SessionRegistry, SessionSnapshot, SessionStatus},
};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// How long a QR request waits for the first pairing code.
    pub qr_timeout: Duration,
    pub qr_poll_interval: Duration,
    /// Connection attempts before a session is dropped.
    pub pairing_attempts: u32,
    pub pairing_backoff: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            qr_timeout: Duration::from_secs(10),
            qr_poll_interval: Duration::from_millis(100),
            pairing_attempts: 3,
            pairing_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Started,
    AlreadyInitialized,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn CredentialStore>,
    connector: Arc<dyn Connector>,
    pipeline: Arc<MessagePipeline>,
    settings: SessionSettings,
    /// Serializes authentication per identity hash.
    identity_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        connector: Arc<dyn Connector>,
        pipeline: Arc<MessagePipeline>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Arc::new(SessionRegistry::new()),
                store,
                connector,
                pipeline,
                settings,
                identity_locks: DashMap::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    /// Register `id` and spawn its supervisor task. Idempotent: a live
    /// session is left untouched.
    pub async fn create_session(&self, id: &SessionId) -> CreateOutcome {
        let registry = &self.inner.registry;
        let Some(generation) = registry.insert_new(id).await else {
            debug!(session = %id, "session already initialized");
            return CreateOutcome::AlreadyInitialized;
        };
        info!(session = %id, generation, "starting session");

        let manager = self.clone();
        let task_id = id.clone();
        let handle = tokio::spawn(async move { manager.supervise(task_id, generation).await });
        registry
            .update_generation(id, generation, |s| s.task = Some(handle.abort_handle()))
            .await;
        CreateOutcome::Started
    }

    pub async fn status(&self, id: &SessionId) -> SessionStatus {
        self.inner.registry.status(id).await
    }

    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.inner.registry.list().await
    }

    /// Latest pairing code of a live session, if one was emitted yet.
    pub async fn current_qr(&self, id: &SessionId) -> Result<Option<String>, SessionError> {
        let session = self
            .inner
            .registry
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        if session.state == PairingState::Authenticated {
            return Err(SessionError::AlreadyAuthenticated(id.clone()));
        }
        Ok(session.qr_code.filter(|code| !code.is_empty()))
    }

    /// Poll until the session has a pairing code or the configured timeout
    /// elapses.
    pub async fn wait_for_qr(&self, id: &SessionId) -> Result<String, SessionError> {
        let settings = &self.inner.settings;
        let deadline = Instant::now() + settings.qr_timeout;
        let mut ticker =
            tokio::time::interval(settings.qr_poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Some(code) = self.current_qr(id).await? {
                return Ok(code);
            }
            if Instant::now() >= deadline {
                debug!(session = %id, "no pairing code before timeout");
                return Err(SessionError::QrTimeout(id.clone()));
            }
        }
    }

    /// Start the session if needed and wait for its pairing code.
    pub async fn start_and_wait_for_qr(&self, id: &SessionId) -> Result<String, SessionError> {
        self.create_session(id).await;
        self.wait_for_qr(id).await
    }

    /// Terminate a session and forget its credentials.
    ///
    /// Safe to call for ids that are not live or do not exist at all. If the
    /// session is not live but its credential record holds an identity, a
    /// transient connection is opened only to unlink the device.
    pub async fn logout(&self, id: &SessionId) {
        match self.inner.registry.remove(id).await {
            Some(mut session) => {
                session.state = PairingState::Terminated;
                if let Some(task) = session.task.take() {
                    task.abort();
                }
                if let Some(client) = session.client.take() {
                    if session.identity.is_some()
                        && let Err(e) = client.logout().await
                    {
                        warn!(session = %id, error = %e, "protocol logout failed");
                    }
                    client.disconnect().await;
                }
                info!(session = %id, "session logged out");
            },
            None => self.logout_detached(id).await,
        }

        match self.inner.store.delete(id).await {
            Ok(true) => debug!(session = %id, "credential record removed"),
            Ok(false) => {},
            Err(e) => warn!(session = %id, error = %e, "failed to remove credential record"),
        }
    }

    async fn logout_detached(&self, id: &SessionId) {
        let record = match self.inner.store.load(id).await {
            Ok(Some(record)) if record.has_identity() => record,
            Ok(_) => return,
            Err(e) => {
                warn!(session = %id, error = %e, "cannot read credential record for logout");
                return;
            },
        };
        match self.inner.connector.connect(&record).await {
            Ok(Connection { client, .. }) => {
                if let Err(e) = client.logout().await {
                    warn!(session = %id, error = %e, "protocol logout failed");
                }
                client.disconnect().await;
                info!(session = %id, "logged out persisted session");
            },
            Err(e) => warn!(session = %id, error = %e, "cannot connect to log out session"),
        }
    }

    // ── Session task ────────────────────────────────────────────────────────

    async fn supervise(self, id: SessionId, generation: u64) {
        let attempts = self.inner.settings.pairing_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.run_session(&id, generation).await;
            self.detach_client(&id, generation).await;
            match result {
                Ok(()) => return,
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(session = %id, attempt, error = %e, "session connection failed, retrying");
                    tokio::time::sleep(self.inner.settings.pairing_backoff).await;
                },
                Err(SessionError::Protocol(ProtocolError::Disconnected)) => {
                    info!(session = %id, "protocol connection closed");
                    break;
                },
                Err(e) => {
                    warn!(session = %id, attempt, error = %e, "giving up on session");
                    break;
                },
            }
        }
        if self
            .inner
            .registry
            .remove_generation(&id, generation)
            .await
            .is_some()
        {
            info!(session = %id, "session dropped, credentials kept");
        }
    }

    /// Drive one connection until it ends. `Ok` means the session is no
    /// longer ours to run.
    async fn run_session(&self, id: &SessionId, generation: u64) -> Result<(), SessionError> {
        let registry = &self.inner.registry;
        let device = self.inner.store.open(id).await?;
        let Connection {
            client,
            mut events,
        } = self.inner.connector.connect(&device).await?;

        let attached = registry
            .update_generation(id, generation, |s| s.client = Some(Arc::clone(&client)))
            .await
            .is_some();
        if !attached {
            client.disconnect().await;
            return Ok(());
        }

        match client.identity() {
            Some(identity) => self.authenticate(id, generation, &identity).await,
            None => {
                registry
                    .update_generation(id, generation, |s| {
                        if s.state == PairingState::Initializing {
                            s.state = PairingState::AwaitingScan;
                        }
                    })
                    .await;
                debug!(session = %id, "awaiting QR scan");
            },
        }

        while let Some(event) = events.recv().await {
            match event {
                ProtocolEvent::QrCode(code) => self.record_qr(id, generation, code).await,
                ProtocolEvent::PairSuccess { identity } => {
                    self.authenticate(id, generation, &identity).await
                },
                ProtocolEvent::PairError(reason) => {
                    return Err(SessionError::PairingFailed {
                        session: id.clone(),
                        reason,
                    });
                },
                ProtocolEvent::Message(message) => {
                    self.handle_message(id, generation, &message).await
                },
                ProtocolEvent::Disconnected => break,
            }
        }
        Err(ProtocolError::Disconnected.into())
    }

    /// Disconnect the session's client and clear its pairing code.
    async fn detach_client(&self, id: &SessionId, generation: u64) {
        let client = self
            .inner
            .registry
            .update_generation(id, generation, |s| {
                s.qr_code = None;
                s.client.take()
            })
            .await
            .flatten();
        if let Some(client) = client {
            client.disconnect().await;
        }
    }

    async fn record_qr(&self, id: &SessionId, generation: u64, code: String) {
        let updated = self
            .inner
            .registry
            .update_generation(id, generation, |s| {
                if s.state == PairingState::Authenticated {
                    return false;
                }
                s.state = PairingState::AwaitingScan;
                s.qr_code = Some(code);
                true
            })
            .await;
        if updated == Some(true) {
            debug!(session = %id, "pairing code refreshed");
        }
    }

    /// Bind the session to `raw_identity`. Any other session already bound
    /// to the same identity is logged out first, so the most recent
    /// authentication wins.
    async fn authenticate(&self, id: &SessionId, generation: u64, raw_identity: &str) {
        let identity = hash_identifier(raw_identity);
        let lock = self.identity_lock(&identity);
        let _guard = lock.lock().await;

        for other in self
            .inner
            .registry
            .find_by_identity(&identity, Some(id))
            .await
        {
            info!(session = %other, replaced_by = %id, "identity re-paired, logging out older session");
            self.logout(&other).await;
        }

        if let Err(e) = self.persist_identity(id, raw_identity).await {
            warn!(session = %id, error = %e, "failed to persist identity");
        }

        let committed = self
            .inner
            .registry
            .update_generation(id, generation, |s| {
                s.state = PairingState::Authenticated;
                s.identity = Some(identity.clone());
                s.qr_code = None;
            })
            .await
            .is_some();
        if committed {
            info!(session = %id, user = %identity, "session connected");
        }
    }

    /// Record the identity on the session's credentials. A record deleted by
    /// a concurrent logout stays deleted.
    async fn persist_identity(&self, id: &SessionId, raw_identity: &str) -> Result<(), StoreError> {
        let Some(mut record) = self.inner.store.load(id).await? else {
            debug!(session = %id, "credentials gone, not persisting identity");
            return Ok(());
        };
        if record.identity.as_deref() != Some(raw_identity) {
            record.identity = Some(raw_identity.to_string());
            self.inner.store.save(&record).await?;
        }
        Ok(())
    }

    fn identity_lock(&self, identity: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.inner
                .identity_locks
                .entry(identity.to_string())
                .or_default()
                .value(),
        )
    }

    async fn handle_message(&self, id: &SessionId, generation: u64, message: &InboundMessage) {
        let owner = self
            .inner
            .registry
            .get(id)
            .await
            .filter(|s| s.generation == generation && s.state == PairingState::Authenticated)
            .and_then(|s| s.identity);
        let Some(owner) = owner else {
            debug!(session = %id, message_id = %message.id, "dropping message received before authentication");
            return;
        };
        match self.inner.pipeline.ingest(&owner, message).await {
            Ok(Some(record)) => debug!(session = %id, %record, "message ingested"),
            Ok(None) => {},
            Err(e) => {
                error!(session = %id, message_id = %message.id, error = %e, "failed to ingest message")
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            crypto::{INSECURE_DEFAULT_KEY, MessageCipher},
            loopback::LoopbackConnector,
            protocol::MessagePayload,
        },
        chatmap_logstore::{LogEntry, MemoryLogStore},
        chatmap_sessions::FileCredentialStore,
        chrono::Utc,
        tempfile::TempDir,
    };

    struct Harness {
        manager: SessionManager,
        connector: LoopbackConnector,
        log: Arc<MemoryLogStore>,
        cipher: Arc<MessageCipher>,
        store: Arc<FileCredentialStore>,
        _dir: TempDir,
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            qr_timeout: Duration::from_secs(2),
            qr_poll_interval: Duration::from_millis(5),
            pairing_attempts: 3,
            pairing_backoff: Duration::from_millis(10),
        }
    }

    fn harness_with(connector: LoopbackConnector, settings: SessionSettings) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCredentialStore::new(dir.path()));
        let log = Arc::new(MemoryLogStore::new());
        let cipher = Arc::new(MessageCipher::new(INSECURE_DEFAULT_KEY.as_bytes()).unwrap());
        let pipeline = Arc::new(MessagePipeline::new(
            Arc::clone(&cipher),
            log.clone(),
            "messages:",
        ));
        let manager = SessionManager::new(
            store.clone(),
            Arc::new(connector.clone()),
            pipeline,
            settings,
        );
        Harness {
            manager,
            connector,
            log,
            cipher,
            store,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        harness_with(LoopbackConnector::new(), settings())
    }

    fn sid(s: &str) -> SessionId {
        SessionId::new(s).unwrap()
    }

    fn text(body: &str) -> InboundMessage {
        InboundMessage {
            id: "MSG".into(),
            sender: "peer@s.whatsapp.net".into(),
            chat: "peer@s.whatsapp.net".into(),
            timestamp: Utc::now(),
            payload: MessagePayload::Text(body.into()),
        }
    }

    async fn wait_status(manager: &SessionManager, id: &SessionId, expected: SessionStatus) {
        for _ in 0..300 {
            if manager.status(id).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "session {id} never reached {expected:?}, is {:?}",
            manager.status(id).await
        );
    }

    async fn wait_entries(log: &MemoryLogStore, partition: &str, n: usize) -> Vec<LogEntry> {
        for _ in 0..300 {
            let entries = log.entries(partition).await;
            if entries.len() >= n {
                return entries;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("partition {partition} never reached {n} entries");
    }

    async fn connect_and_pair(h: &Harness, id: &SessionId, identity: &str) {
        h.manager.start_and_wait_for_qr(id).await.unwrap();
        assert!(h.connector.pair(id, identity).await);
        wait_status(
            &h.manager,
            id,
            SessionStatus::Connected(hash_identifier(identity)),
        )
        .await;
    }

    #[tokio::test]
    async fn linked_account_connects_without_scan() {
        let h = harness();
        let id = sid("abc");
        h.connector.preauthorize(&id, "u1");
        assert_eq!(h.manager.status(&id).await, SessionStatus::NotFound);

        h.manager.create_session(&id).await;
        wait_status(
            &h.manager,
            &id,
            SessionStatus::Connected(hash_identifier("u1")),
        )
        .await;
        assert!(h.store.has_identity(&id).await.unwrap());
    }

    #[tokio::test]
    async fn status_only_moves_forward_while_pairing() {
        let h = harness();
        let id = sid("mono");
        let watcher = {
            let manager = h.manager.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..300 {
                    let status = manager.status(&id).await;
                    if seen.last() != Some(&status) {
                        seen.push(status.clone());
                    }
                    if matches!(status, SessionStatus::Connected(_)) {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                seen
            })
        };
        connect_and_pair(&h, &id, "u1").await;
        let seen = watcher.await.unwrap();

        let connected = SessionStatus::Connected(hash_identifier("u1"));
        assert_eq!(seen.last(), Some(&connected));
        let first_connected = seen.iter().position(|s| *s == connected).unwrap();
        assert!(
            seen[..first_connected]
                .iter()
                .skip_while(|s| **s == SessionStatus::NotFound)
                .all(|s| *s == SessionStatus::Waiting)
        );
    }

    #[tokio::test]
    async fn text_with_plain_number_is_encrypted_not_located() {
        let h = harness();
        let id = sid("abc");
        h.connector.preauthorize(&id, "u1");
        h.manager.create_session(&id).await;
        let user = hash_identifier("u1");
        wait_status(&h.manager, &id, SessionStatus::Connected(user.clone())).await;

        h.connector.deliver(&id, text("price is 10.5")).await;
        let entries = wait_entries(&h.log, &format!("messages:{user}"), 1).await;
        assert!(!entries[0].field("text").is_empty());
        assert_eq!(entries[0].field("location"), "");
        assert_eq!(
            h.cipher.decrypt(entries[0].field("text")).unwrap(),
            "price is 10.5"
        );
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let h = harness();
        let id = sid("abc");
        assert_eq!(h.manager.create_session(&id).await, CreateOutcome::Started);
        assert_eq!(
            h.manager.create_session(&id).await,
            CreateOutcome::AlreadyInitialized
        );
        assert_eq!(h.manager.list_sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn pairing_then_message_lands_in_identity_partition() {
        let h = harness();
        let id = sid("s1");

        let code = h.manager.start_and_wait_for_qr(&id).await.unwrap();
        assert!(!code.is_empty());
        assert_eq!(h.manager.status(&id).await, SessionStatus::Waiting);

        assert!(h.connector.pair(&id, "u1").await);
        let user = hash_identifier("u1");
        wait_status(&h.manager, &id, SessionStatus::Connected(user.clone())).await;

        let record = h.store.load(&id).await.unwrap().unwrap();
        assert_eq!(record.identity.as_deref(), Some("u1"));

        assert!(h.connector.deliver(&id, text("hello")).await);
        let entries = wait_entries(&h.log, &format!("messages:{user}"), 1).await;
        assert_eq!(entries[0].field("user"), user);
        assert_eq!(h.cipher.decrypt(entries[0].field("text")).unwrap(), "hello");
    }

    #[tokio::test]
    async fn messages_are_appended_in_arrival_order() {
        let h = harness();
        let id = sid("ordered");
        connect_and_pair(&h, &id, "u1").await;

        let at = Utc::now();
        for body in ["one", "two", "three"] {
            let mut msg = text(body);
            msg.timestamp = at;
            h.connector.deliver(&id, msg).await;
        }
        let partition = format!("messages:{}", hash_identifier("u1"));
        let entries = wait_entries(&h.log, &partition, 3).await;
        let bodies: Vec<_> = entries
            .iter()
            .map(|e| h.cipher.decrypt(e.field("text")).unwrap())
            .collect();
        assert_eq!(bodies, ["one", "two", "three"]);
        assert!(entries.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn qr_request_after_authentication_is_rejected() {
        let h = harness();
        let id = sid("done");
        connect_and_pair(&h, &id, "u1").await;
        assert!(matches!(
            h.manager.wait_for_qr(&id).await,
            Err(SessionError::AlreadyAuthenticated(_))
        ));
    }

    #[tokio::test]
    async fn qr_wait_times_out_without_code() {
        let h = harness_with(LoopbackConnector::new().with_manual_qr(), SessionSettings {
            qr_timeout: Duration::from_millis(50),
            ..settings()
        });
        let id = sid("slow");
        assert!(matches!(
            h.manager.start_and_wait_for_qr(&id).await,
            Err(SessionError::QrTimeout(_))
        ));
        assert_eq!(h.manager.status(&id).await, SessionStatus::Waiting);
    }

    #[tokio::test]
    async fn latest_qr_code_wins() {
        let h = harness_with(LoopbackConnector::new().with_manual_qr(), settings());
        let id = sid("rotating");
        h.manager.create_session(&id).await;
        while !h.connector.is_connected(&id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.connector.emit_qr(&id, "first").await;
        h.connector.emit_qr(&id, "second").await;
        for _ in 0..300 {
            if h.manager.current_qr(&id).await.unwrap().as_deref() == Some("second") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("second code never became current");
    }

    #[tokio::test]
    async fn repairing_identity_logs_out_older_session() {
        let h = harness();
        let (a, b) = (sid("a"), sid("b"));
        connect_and_pair(&h, &a, "u1").await;
        connect_and_pair(&h, &b, "u1").await;

        assert_eq!(h.manager.status(&a).await, SessionStatus::NotFound);
        assert_eq!(
            h.manager.status(&b).await,
            SessionStatus::Connected(hash_identifier("u1"))
        );
        assert_eq!(h.connector.logout_count(&a), 1);
        assert!(h.store.load(&a).await.unwrap().is_none());
        assert!(h.store.load(&b).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pairing_of_one_identity_keeps_one_session() {
        let h = harness();
        let (a, b) = (sid("a"), sid("b"));
        h.manager.start_and_wait_for_qr(&a).await.unwrap();
        h.manager.start_and_wait_for_qr(&b).await.unwrap();

        let (paired_a, paired_b) = tokio::join!(
            h.connector.pair(&a, "u1"),
            h.connector.pair(&b, "u1")
        );
        assert!(paired_a && paired_b);

        let connected = SessionStatus::Connected(hash_identifier("u1"));
        for _ in 0..300 {
            let statuses = [h.manager.status(&a).await, h.manager.status(&b).await];
            let live = statuses.iter().filter(|s| **s == connected).count();
            let gone = statuses
                .iter()
                .filter(|s| **s == SessionStatus::NotFound)
                .count();
            if live == 1 && gone == 1 {
                assert_eq!(h.manager.list_sessions().await.len(), 1);
                return;
            }
            assert!(live <= 1, "both sessions connected to one identity");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("dedup never settled on a single session");
    }

    #[tokio::test]
    async fn identity_is_not_persisted_after_logout_removed_credentials() {
        let h = harness();
        let id = sid("raced");
        h.manager.persist_identity(&id, "u1").await.unwrap();
        assert!(h.store.load(&id).await.unwrap().is_none());

        h.store.open(&id).await.unwrap();
        h.manager.persist_identity(&id, "u1").await.unwrap();
        assert!(h.store.has_identity(&id).await.unwrap());
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let h = harness();
        let id = sid("bye");
        connect_and_pair(&h, &id, "u1").await;

        h.manager.logout(&id).await;
        assert_eq!(h.manager.status(&id).await, SessionStatus::NotFound);
        assert!(h.store.load(&id).await.unwrap().is_none());
        assert_eq!(h.connector.logout_count(&id), 1);

        h.manager.logout(&id).await;
        h.manager.logout(&sid("never-existed")).await;
        assert_eq!(h.manager.status(&id).await, SessionStatus::NotFound);
        assert_eq!(h.connector.logout_count(&id), 1);
    }

    #[tokio::test]
    async fn logout_of_unpaired_session_skips_protocol_logout() {
        let h = harness();
        let id = sid("pending");
        h.manager.start_and_wait_for_qr(&id).await.unwrap();
        h.manager.logout(&id).await;
        assert_eq!(h.connector.logout_count(&id), 0);
        assert_eq!(h.connector.disconnect_count(&id), 1);
        assert!(h.manager.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn logout_of_persisted_session_unlinks_device() {
        let h = harness();
        let id = sid("offline");
        let mut record = h.store.open(&id).await.unwrap();
        record.identity = Some("u9".into());
        h.store.save(&record).await.unwrap();

        h.manager.logout(&id).await;
        assert_eq!(h.connector.logout_count(&id), 1);
        assert!(h.store.load(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn messages_before_pairing_are_dropped() {
        let h = harness();
        let id = sid("early");
        h.manager.start_and_wait_for_qr(&id).await.unwrap();
        h.connector.deliver(&id, text("too soon")).await;
        h.connector.pair(&id, "u1").await;
        wait_status(
            &h.manager,
            &id,
            SessionStatus::Connected(hash_identifier("u1")),
        )
        .await;
        assert!(h.log.partitions().await.is_empty());
    }

    #[tokio::test]
    async fn connect_failures_are_retried() {
        let h = harness();
        h.connector.fail_next_connects(2);
        let id = sid("flaky");
        h.manager.start_and_wait_for_qr(&id).await.unwrap();
        assert_eq!(h.connector.connect_count(), 3);
    }

    #[tokio::test]
    async fn session_dropped_after_exhausting_attempts() {
        let h = harness();
        h.connector.fail_next_connects(10);
        let id = sid("dead");
        h.manager.create_session(&id).await;
        wait_status(&h.manager, &id, SessionStatus::NotFound).await;
        assert_eq!(h.connector.connect_count(), 3);
        // Credentials survive for the next start.
        assert!(h.store.load(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn closed_connection_drops_session_but_keeps_credentials() {
        let h = harness();
        let id = sid("gone");
        connect_and_pair(&h, &id, "u1").await;
        h.connector.emit(&id, ProtocolEvent::Disconnected).await;
        wait_status(&h.manager, &id, SessionStatus::NotFound).await;
        assert!(h.store.has_identity(&id).await.unwrap());
        assert_eq!(h.connector.logout_count(&id), 0);
    }

    #[tokio::test]
    async fn pairing_error_drops_session() {
        let h = harness();
        let id = sid("rejected");
        h.manager.start_and_wait_for_qr(&id).await.unwrap();
        h.connector
            .emit(&id, ProtocolEvent::PairError("client outdated".into()))
            .await;
        wait_status(&h.manager, &id, SessionStatus::NotFound).await;
    }
}
