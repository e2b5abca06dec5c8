//! Weighted scoring over per-task outcomes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::session::SessionStatus;
use crate::tasks::{Difficulty, Tier};

/// One task's contribution to an eval run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Agent process exit code, if it exited.
    pub agent_exit_code: Option<i32>,
    /// Whether the agent hit its wall-clock budget.
    pub agent_timed_out: bool,
    pub difficulty: Difficulty,
    pub passed: bool,
    /// Canonical `<language>/<slug>`.
    pub reference: String,
    /// Session id of the verification run.
    pub session_id: String,
    pub status: SessionStatus,
    pub tier: Tier,
    /// Effective task weight.
    pub weight: f64,
}

/// Score totals for one slice of tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreTotals {
    /// Σ weight over passed tasks.
    pub achieved: f64,
    /// Number of passed tasks.
    pub passed: usize,
    /// Σ weight over attempted tasks.
    pub possible: f64,
    /// Number of attempted tasks.
    pub total: usize,
}

impl ScoreTotals {
    fn add(&mut self, outcome: &TaskOutcome) {
        self.possible += outcome.weight;
        self.total += 1;
        if outcome.passed {
            self.achieved += outcome.weight;
            self.passed += 1;
        }
    }

    /// Achieved over possible, zero when nothing was attempted.
    pub fn ratio(&self) -> f64 {
        if self.possible == 0.0 {
            0.0
        } else {
            self.achieved / self.possible
        }
    }
}

/// Aggregate score with per-tier breakdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scoreboard {
    pub overall: ScoreTotals,
    /// Keyed by tier name.
    pub tiers: BTreeMap<String, ScoreTotals>,
}

impl Scoreboard {
    /// Computes totals over a set of outcomes.
    pub fn compute(outcomes: &[TaskOutcome]) -> Self {
        let mut board = Scoreboard::default();
        for outcome in outcomes {
            board.overall.add(outcome);
            board
                .tiers
                .entry(outcome.tier.to_string())
                .or_default()
                .add(outcome);
        }
        board
    }
}
