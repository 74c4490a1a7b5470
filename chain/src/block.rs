// Blocks and formula scoring

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sentinel parent hash of root blocks
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Required hex prefix of every mined block hash
pub const DIFFICULTY_TARGET: &str = "000";

/// How a formula is represented, which also drives its MDL cost
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FormulaRepr {
    Text {
        content: String,
    },
    Analytic {
        expression: String,
        coefficients: Vec<f64>,
    },
}

/// A candidate formula with its measured effectiveness
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    pub id: String,
    pub effectiveness: f64,
    pub repr: FormulaRepr,
}

impl Formula {
    pub fn text(id: impl Into<String>, effectiveness: f64, content: impl Into<String>) -> Self {
        Formula {
            id: id.into(),
            effectiveness,
            repr: FormulaRepr::Text {
                content: content.into(),
            },
        }
    }

    pub fn analytic(
        id: impl Into<String>,
        effectiveness: f64,
        expression: impl Into<String>,
        coefficients: Vec<f64>,
    ) -> Self {
        Formula {
            id: id.into(),
            effectiveness,
            repr: FormulaRepr::Analytic {
                expression: expression.into(),
                coefficients,
            },
        }
    }
}

/// PoE, MDL and combined score of one formula
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FormulaScore {
    pub poe: f64,
    pub mdl: f64,
    pub score: f64,
}

/// `poe` is effectiveness clamped to [0, 1]; `mdl` is a length-based
/// complexity cost; `score = max(0, poe - 0.01 * mdl)`.
pub fn score_formula(formula: &Formula) -> FormulaScore {
    let poe = formula.effectiveness.clamp(0.0, 1.0);
    let mdl = match &formula.repr {
        FormulaRepr::Text { content } => content.len() as f64,
        FormulaRepr::Analytic {
            expression,
            coefficients,
        } => 8.0 + 4.0 * coefficients.len() as f64 + expression.len() as f64,
    };
    let score = (poe - 0.01 * mdl).max(0.0);
    FormulaScore { poe, mdl, score }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A mined block. `hash` is SHA-256 over the block content and nonce,
/// rendered as 64 lowercase hex characters.
#[derive(Clone, Debug)]
pub struct Block {
    pub formulas: Vec<Formula>,
    pub prev_hash: String,
    pub hash: String,
    pub timestamp_ms: u64,
    pub nonce: u32,
    pub poe_sum: f64,
    pub poe_average: f64,
    pub mdl_sum: f64,
    pub mdl_average: f64,
    pub score_sum: f64,
    pub score_average: f64,
    pub poe_threshold: f64,
    pub mdl_delta: f64,
    pub cumulative_poe: f64,
    pub cumulative_score: f64,
    pub parent_index: Option<usize>,
    pub height: u64,
    pub on_main_chain: bool,
    pub validation_status: ValidationStatus,
}

impl Block {
    /// Recompute the content hash from `prev_hash`, timestamp, formulas
    /// and nonce.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.timestamp_ms.to_le_bytes());
        for formula in &self.formulas {
            match &formula.repr {
                FormulaRepr::Text { content } => {
                    hasher.update(content.as_bytes());
                }
                FormulaRepr::Analytic {
                    expression,
                    coefficients,
                } => {
                    hasher.update(expression.as_bytes());
                    for coefficient in coefficients {
                        hasher.update(coefficient.to_le_bytes());
                    }
                }
            }
        }
        hasher.update(self.nonce.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn meets_difficulty(&self) -> bool {
        self.hash.starts_with(DIFFICULTY_TARGET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_formula_scoring() {
        let formula = Formula::text("f1", 0.9, "x+1");
        let score = score_formula(&formula);
        assert_eq!(score.poe, 0.9);
        assert_eq!(score.mdl, 3.0);
        assert!((score.score - 0.87).abs() < 1e-9);
    }

    #[test]
    fn test_analytic_formula_scoring() {
        let formula = Formula::analytic("f2", 0.5, "a*x+b", vec![1.0, 2.0]);
        let score = score_formula(&formula);
        // 8 + 4*2 + 6 = 22
        assert_eq!(score.mdl, 22.0);
        assert!((score.score - (0.5 - 0.22)).abs() < 1e-9);
    }

    #[test]
    fn test_effectiveness_clamped() {
        let hot = Formula::text("f3", 1.7, "y");
        assert_eq!(score_formula(&hot).poe, 1.0);
        let cold = Formula::text("f4", -0.3, "y");
        assert_eq!(score_formula(&cold).poe, 0.0);
    }

    #[test]
    fn test_score_floors_at_zero() {
        let verbose = Formula::text("f5", 0.1, "x".repeat(100));
        assert_eq!(score_formula(&verbose).score, 0.0);
    }

    #[test]
    fn test_hash_depends_on_nonce() {
        let mut block = Block {
            formulas: vec![Formula::text("f", 0.9, "x")],
            prev_hash: GENESIS_PREV_HASH.to_string(),
            hash: String::new(),
            timestamp_ms: 1_700_000_000_000,
            nonce: 0,
            poe_sum: 0.9,
            poe_average: 0.9,
            mdl_sum: 1.0,
            mdl_average: 1.0,
            score_sum: 0.89,
            score_average: 0.89,
            poe_threshold: 0.8,
            mdl_delta: 1.0,
            cumulative_poe: 0.9,
            cumulative_score: 0.89,
            parent_index: None,
            height: 1,
            on_main_chain: true,
            validation_status: ValidationStatus::Pending,
        };
        let first = block.compute_hash();
        assert_eq!(first.len(), 64);
        assert_eq!(first, block.compute_hash());
        block.nonce = 1;
        assert_ne!(first, block.compute_hash());
    }
}
