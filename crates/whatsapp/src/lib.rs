//! WhatsApp account bridge: session pairing, inbound message ingestion and
//! deferred media retrieval.
//!
//! Flow at ingestion:
//! 1. [`SessionManager::create_session`] registers a session and spawns its
//!    consumer task, which connects through a [`Connector`]
//! 2. The protocol backend either reports a stored identity or streams QR
//!    codes until the account is paired
//! 3. On pairing, older sessions of the same identity are logged out
//! 4. Inbound messages are classified, encrypted and appended to the
//!    identity's log partition by the [`MessagePipeline`]
//!
//! At read time, [`MediaRetriever`] resolves a stored [`MediaReference`] back
//! to bytes through the owning session's protocol client.

pub mod crypto;
pub mod error;
pub mod location;
pub mod loopback;
pub mod manager;
pub mod media;
pub mod pipeline;
pub mod protocol;
pub mod reaper;
pub mod record;
pub mod registry;

pub use {
    crypto::{MessageCipher, hash_identifier},
    error::{CipherError, MediaError, PipelineError, ProtocolError, SessionError},
    loopback::LoopbackConnector,
    manager::{CreateOutcome, SessionManager, SessionSettings},
    media::{MediaContent, MediaKind, MediaReference, MediaRetriever},
    pipeline::MessagePipeline,
    protocol::{
        Connection, Connector, InboundMessage, MediaMetadata, MessagePayload, ProtocolClient,
        ProtocolEvent,
    },
    reaper::{ReconcileReport, reconcile},
    record::{MessageRecord, RecordContent},
    registry::{PairingState, SessionRegistry, SessionSnapshot, SessionStatus},
};
