//! Append-only, per-partition message log.
//!
//! Entries are addressed by a compound [`StreamId`] (`<millis>-<seq>`) and
//! carry a flat string field map. Partitions are independent and ordered by
//! id, so `range(partition, id, id)` is an exact-match lookup.

pub mod id;
pub mod memory;
pub mod sled_store;
pub mod store;

pub use {
    id::StreamId,
    memory::MemoryLogStore,
    sled_store::SledLogStore,
    store::{Fields, LogEntry, LogStore, LogStoreError},
};
