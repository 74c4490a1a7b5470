// Chain state: block store, mining, policy gates, fork choice

use crate::block::{
    score_formula, Block, Formula, ValidationStatus, DIFFICULTY_TARGET, GENESIS_PREV_HASH,
};
use kolibri_core::clock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("block has no formulas")]
    EmptyBlock,

    #[error("poe average {poe_average:.3} below threshold {threshold:.3}")]
    PolicyRejected { poe_average: f64, threshold: f64 },

    #[error("mdl delta {mdl_delta:.3} exceeds allowed {max:.3}")]
    MdlRejected { mdl_delta: f64, max: f64 },

    #[error("no block with hash {0}")]
    UnknownParent(String),

    #[error("chain lock poisoned")]
    Poisoned,
}

/// Admission gates applied before mining
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ChainPolicy {
    pub min_pou_threshold: f64,
    pub max_mdl_delta: Option<f64>,
}

impl Default for ChainPolicy {
    fn default() -> Self {
        ChainPolicy {
            min_pou_threshold: 0.8,
            max_mdl_delta: None,
        }
    }
}

/// Input to `add_block`: formulas plus an optional explicit parent hash.
/// Without one the block extends the current main tip.
#[derive(Clone, Debug)]
pub struct BlockSpec {
    pub formulas: Vec<Formula>,
    pub prev_hash: Option<String>,
}

impl BlockSpec {
    pub fn new(formulas: Vec<Formula>) -> Self {
        BlockSpec {
            formulas,
            prev_hash: None,
        }
    }

    pub fn with_parent(formulas: Vec<Formula>, prev_hash: impl Into<String>) -> Self {
        BlockSpec {
            formulas,
            prev_hash: Some(prev_hash.into()),
        }
    }
}

/// Location of an accepted block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHandle {
    pub index: usize,
    pub hash: String,
    pub height: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuditMessage {
    pub text: String,
    pub timestamp_ms: u64,
}

/// Two rolling audit messages, updated on accept/reject and verify
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditLog {
    pub verification: Option<AuditMessage>,
    pub finalization: Option<AuditMessage>,
}

impl AuditLog {
    fn note_finalization(&mut self, text: String) {
        self.finalization = Some(AuditMessage {
            text,
            timestamp_ms: clock::now_wall_ms(),
        });
    }

    fn note_verification(&mut self, text: String) {
        self.verification = Some(AuditMessage {
            text,
            timestamp_ms: clock::now_wall_ms(),
        });
    }
}

struct ChainState {
    blocks: Vec<Block>,
    main_tip: Option<usize>,
    policy: ChainPolicy,
    audit: AuditLog,
}

/// The PoE chain. One mutex serialises every read and write.
pub struct Chain {
    state: Mutex<ChainState>,
}

impl Chain {
    pub fn new() -> Self {
        Self::with_policy(ChainPolicy::default())
    }

    pub fn with_policy(policy: ChainPolicy) -> Self {
        Chain {
            state: Mutex::new(ChainState {
                blocks: Vec::new(),
                main_tip: None,
                policy,
                audit: AuditLog::default(),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ChainState>, ChainError> {
        self.state.lock().map_err(|_| ChainError::Poisoned)
    }

    pub fn set_policy(&self, policy: ChainPolicy) -> Result<(), ChainError> {
        self.lock()?.policy = policy;
        Ok(())
    }

    pub fn policy(&self) -> ChainPolicy {
        self.lock().map(|s| s.policy).unwrap_or_default()
    }

    /// Score, gate, mine and append a block, then re-run fork choice.
    pub fn add_block(&self, spec: BlockSpec) -> Result<BlockHandle, ChainError> {
        let mut state = self.lock()?;
        match Self::add_block_locked(&mut state, spec) {
            Ok(handle) => {
                state
                    .audit
                    .note_finalization(format!("accepted block {} at height {}", handle.hash, handle.height));
                info!(hash = %handle.hash, height = handle.height, "block accepted");
                Ok(handle)
            }
            Err(error) => {
                state
                    .audit
                    .note_finalization(format!("rejected block: {error}"));
                warn!(%error, "block rejected");
                Err(error)
            }
        }
    }

    fn add_block_locked(state: &mut ChainState, spec: BlockSpec) -> Result<BlockHandle, ChainError> {
        if spec.formulas.is_empty() {
            return Err(ChainError::EmptyBlock);
        }

        let mut poe_sum = 0.0;
        let mut mdl_sum = 0.0;
        let mut score_sum = 0.0;
        for formula in &spec.formulas {
            let score = score_formula(formula);
            poe_sum += score.poe;
            mdl_sum += score.mdl;
            score_sum += score.score;
        }
        let count = spec.formulas.len() as f64;
        let poe_average = poe_sum / count;
        let mdl_average = mdl_sum / count;
        let score_average = score_sum / count;

        let policy = state.policy;
        if poe_average < policy.min_pou_threshold {
            return Err(ChainError::PolicyRejected {
                poe_average,
                threshold: policy.min_pou_threshold,
            });
        }

        let prev_hash = spec
            .prev_hash
            .unwrap_or_else(|| Self::last_hash_locked(state));
        let parent_index = if prev_hash == GENESIS_PREV_HASH {
            None
        } else {
            Some(
                state
                    .blocks
                    .iter()
                    .position(|b| b.hash == prev_hash)
                    .ok_or_else(|| ChainError::UnknownParent(prev_hash.clone()))?,
            )
        };

        let (parent_height, parent_mdl, parent_cumulative_poe, parent_cumulative_score) =
            match parent_index {
                Some(index) => {
                    let parent = &state.blocks[index];
                    (
                        parent.height,
                        parent.mdl_average,
                        parent.cumulative_poe,
                        parent.cumulative_score,
                    )
                }
                None => (0, 0.0, 0.0, 0.0),
            };

        let mdl_delta = mdl_average - parent_mdl;
        if let Some(max) = policy.max_mdl_delta {
            if mdl_delta > max {
                return Err(ChainError::MdlRejected { mdl_delta, max });
            }
        }

        let mut block = Block {
            formulas: spec.formulas,
            prev_hash,
            hash: String::new(),
            timestamp_ms: clock::now_wall_ms(),
            nonce: 0,
            poe_sum,
            poe_average,
            mdl_sum,
            mdl_average,
            score_sum,
            score_average,
            poe_threshold: policy.min_pou_threshold,
            mdl_delta,
            cumulative_poe: parent_cumulative_poe + poe_average,
            cumulative_score: parent_cumulative_score + score_average,
            parent_index,
            height: parent_height + 1,
            on_main_chain: false,
            validation_status: ValidationStatus::Pending,
        };

        mine(&mut block);
        block.validation_status = ValidationStatus::Accepted;
        debug!(nonce = block.nonce, hash = %block.hash, "mined block");

        let index = state.blocks.len();
        let handle = BlockHandle {
            index,
            hash: block.hash.clone(),
            height: block.height,
        };
        state.blocks.push(block);
        run_fork_choice(state);
        Ok(handle)
    }

    fn last_hash_locked(state: &ChainState) -> String {
        match state.main_tip {
            Some(index) => state.blocks[index].hash.clone(),
            None => GENESIS_PREV_HASH.to_string(),
        }
    }

    /// Hash of the main tip, or the genesis sentinel for an empty chain.
    pub fn get_last_hash(&self) -> String {
        self.lock()
            .map(|s| Self::last_hash_locked(&s))
            .unwrap_or_else(|_| GENESIS_PREV_HASH.to_string())
    }

    /// Height of the main tip; 0 for an empty chain.
    pub fn height(&self) -> u64 {
        self.lock()
            .ok()
            .and_then(|s| s.main_tip.map(|i| s.blocks[i].height))
            .unwrap_or(0)
    }

    /// Total stored blocks, forks included.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.blocks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find_block(&self, hash: &str) -> Option<Block> {
        let state = self.lock().ok()?;
        state.blocks.iter().find(|b| b.hash == hash).cloned()
    }

    pub fn block_at(&self, index: usize) -> Option<Block> {
        self.lock().ok()?.blocks.get(index).cloned()
    }

    pub fn main_tip(&self) -> Option<Block> {
        let state = self.lock().ok()?;
        state.main_tip.map(|i| state.blocks[i].clone())
    }

    pub fn audit_log(&self) -> AuditLog {
        self.lock().map(|s| s.audit.clone()).unwrap_or_default()
    }

    /// Check every block: recomputed hash, difficulty prefix, recorded
    /// policy threshold, parent linkage, and main-chain consistency.
    pub fn verify(&self) -> bool {
        let Ok(mut state) = self.lock() else {
            return false;
        };
        let ok = verify_locked(&state);
        let message = if ok {
            format!("verified {} blocks", state.blocks.len())
        } else {
            "verification failed".to_string()
        };
        state.audit.note_verification(message);
        ok
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

fn mine(block: &mut Block) {
    let mut nonce: u32 = 0;
    loop {
        block.nonce = nonce;
        block.hash = block.compute_hash();
        if block.hash.starts_with(DIFFICULTY_TARGET) {
            return;
        }
        nonce = nonce.wrapping_add(1);
    }
}

/// Pick the preferred tip by `(cumulative_score, cumulative_poe, height,
/// earliest timestamp)` and repaint the main-chain flags along its path.
fn run_fork_choice(state: &mut ChainState) {
    let mut has_child = vec![false; state.blocks.len()];
    for block in &state.blocks {
        if let Some(parent) = block.parent_index {
            has_child[parent] = true;
        }
    }

    let best = state
        .blocks
        .iter()
        .enumerate()
        .filter(|(index, _)| !has_child[*index])
        .max_by(|(_, a), (_, b)| compare_tips(a, b));

    let Some((best_index, _)) = best else {
        state.main_tip = None;
        return;
    };

    for block in state.blocks.iter_mut() {
        block.on_main_chain = false;
    }
    let mut cursor = Some(best_index);
    while let Some(index) = cursor {
        state.blocks[index].on_main_chain = true;
        cursor = state.blocks[index].parent_index;
    }
    state.main_tip = Some(best_index);
}

fn compare_tips(a: &Block, b: &Block) -> Ordering {
    a.cumulative_score
        .partial_cmp(&b.cumulative_score)
        .unwrap_or(Ordering::Equal)
        .then(
            a.cumulative_poe
                .partial_cmp(&b.cumulative_poe)
                .unwrap_or(Ordering::Equal),
        )
        .then(a.height.cmp(&b.height))
        // Earlier timestamp wins the final tie-break
        .then(b.timestamp_ms.cmp(&a.timestamp_ms))
}

fn verify_locked(state: &ChainState) -> bool {
    for block in &state.blocks {
        let recomputed = block.compute_hash();
        if recomputed != block.hash || !recomputed.starts_with(DIFFICULTY_TARGET) {
            return false;
        }
        if block.poe_average < block.poe_threshold {
            return false;
        }
        match block.parent_index {
            Some(parent) => match state.blocks.get(parent) {
                Some(parent_block) => {
                    if parent_block.compute_hash() != block.prev_hash {
                        return false;
                    }
                }
                None => return false,
            },
            None => {
                if block.prev_hash != GENESIS_PREV_HASH {
                    return false;
                }
            }
        }
    }

    // The main-chain marking must be exactly the path fork choice selects
    let mut expected = vec![false; state.blocks.len()];
    let mut has_child = vec![false; state.blocks.len()];
    for block in &state.blocks {
        if let Some(parent) = block.parent_index {
            has_child[parent] = true;
        }
    }
    let best = state
        .blocks
        .iter()
        .enumerate()
        .filter(|(index, _)| !has_child[*index])
        .max_by(|(_, a), (_, b)| compare_tips(a, b))
        .map(|(index, _)| index);
    if best != state.main_tip {
        return false;
    }
    let mut cursor = best;
    while let Some(index) = cursor {
        expected[index] = true;
        cursor = state.blocks[index].parent_index;
    }
    state
        .blocks
        .iter()
        .zip(expected)
        .all(|(block, flag)| block.on_main_chain == flag)
}
