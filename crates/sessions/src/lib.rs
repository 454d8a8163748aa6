//! Session ids and persisted device credentials.
//!
//! Each session owns exactly one credential record, stored as
//! `<dir>/session_<id>.json`. The record is written by the protocol backend
//! and probed at startup to decide whether the session can be restored.

pub mod file;
pub mod key;
pub mod store;

pub use {
    file::FileCredentialStore,
    key::{InvalidSessionId, SessionId},
    store::{CredentialStore, DeviceRecord, StoreError},
};
