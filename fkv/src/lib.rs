//! Kolibri F-KV: a decimal-prefix trie key-value store.
//!
//! - **trie**: the in-memory store, one mutex over everything
//! - **persistence**: WAL + numbered delta files + gzip base snapshot
//! - **replication**: swarm delta frames and sequence deltas
//! - **record**: the shared WAL PUT record framing

pub mod errors;
pub mod persistence;
pub mod record;
pub mod replication;
pub mod trie;

pub use errors::{FkvError, Result};
pub use persistence::PersistenceConfig;
pub use replication::{build_delta, apply_delta, Delta, DeltaEntry};
pub use trie::{Entry, EntryType, Fkv, DEFAULT_TOP_K};
