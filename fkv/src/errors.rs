//! Typed errors for the store, its persistence layer and replication.
//!
//! Every failure leaves the trie unchanged: puts either fully apply or
//! surface one of these.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FkvError>;

#[derive(Error, Debug)]
pub enum FkvError {
    #[error("key byte {byte:#04x} at offset {offset} is not a decimal digit")]
    InvalidKeyDigit { byte: u8, offset: usize },

    #[error("empty key or value")]
    EmptyKeyOrValue,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt WAL record: {0}")]
    CorruptRecord(String),

    #[error("corrupt delta file {path}: {detail}")]
    CorruptDelta { path: PathBuf, detail: String },

    #[error("corrupt base snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("checksum mismatch: expected {expected:#x}, computed {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("record count mismatch: header says {expected}, decoded {actual}")]
    RecordCountMismatch { expected: u64, actual: u64 },

    #[error("payload size mismatch: expected {expected}, actual {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("replication prefix longer than {max} digits")]
    PrefixTooLong { max: usize },

    #[error("delta exceeds wire field limits: {0}")]
    DeltaTooLarge(String),

    #[error("store lock poisoned")]
    Poisoned,
}
