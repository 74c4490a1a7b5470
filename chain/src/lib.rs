// Kolibri PoE Chain
// Content-addressed blocks scoring formulas, with policy gates,
// longest-cumulative-score fork choice and signature-gated swarm admission

pub mod block;
pub mod chain;
pub mod link;

pub use block::{
    score_formula, Block, Formula, FormulaRepr, FormulaScore, ValidationStatus, DIFFICULTY_TARGET,
    GENESIS_PREV_HASH,
};
pub use chain::{
    AuditLog, AuditMessage, BlockHandle, BlockSpec, Chain, ChainError, ChainPolicy,
};
pub use link::{ChainLink, LinkConfig, SharedChainLink, StagedOffer};
