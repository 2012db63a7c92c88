//! Quality gate decisions for the repair loop.

use gamegen_config::RepairPolicy;
use serde::{Deserialize, Serialize};

/// What the loop does after scoring an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Score reached the pass threshold.
    Pass,
    /// Below the pass threshold with attempts left; run a repair unit.
    Repair,
    /// Final attempt between the thresholds; keep the build as is.
    Keep,
    /// Final attempt below the fail threshold.
    Fail,
}

/// Decide the outcome of `attempt` (1-based) scoring `score`.
pub fn judge(policy: &RepairPolicy, attempt: u32, score: f64) -> Verdict {
    if score >= policy.pass_threshold {
        Verdict::Pass
    } else if attempt < policy.max_attempts {
        Verdict::Repair
    } else if score < policy.fail_threshold {
        Verdict::Fail
    } else {
        Verdict::Keep
    }
}

/// Final state of the repair loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairOutcome {
    Passed,
    Kept,
    Failed,
}

/// Stored under `phaseOutputs.repair` when the loop ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairSummary {
    pub outcome: RepairOutcome,
    pub attempts: u32,
    pub final_score: f64,
    pub pass_threshold: f64,
    pub fail_threshold: f64,
}

impl RepairSummary {
    pub fn new(policy: &RepairPolicy, outcome: RepairOutcome, attempts: u32, score: f64) -> Self {
        Self {
            outcome,
            attempts,
            final_score: score,
            pass_threshold: policy.pass_threshold,
            fail_threshold: policy.fail_threshold,
        }
    }
}
