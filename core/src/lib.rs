//! Kolibri core primitives.
//!
//! Everything in this crate is shared by the protocol, storage, VM and
//! chain crates:
//!
//! - **digits**: fixed-width decimal identifiers and field codecs
//! - **hash**: SHA-256 helpers and the wire CRC-16
//! - **crypto**: Ed25519 and HMAC-SHA256 wrappers
//! - **clock**: wall and monotonic millisecond clocks

pub mod clock;
pub mod crypto;
pub mod digits;
pub mod hash;

pub use digits::{
    BlockId, DeltaPrefix, DigitError, DigitId, NodeId, ProgramId, BLOCK_ID_DIGITS,
    DELTA_PREFIX_DIGITS, NODE_ID_DIGITS, PROGRAM_ID_DIGITS,
};

/// Library version (matches Cargo.toml)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
