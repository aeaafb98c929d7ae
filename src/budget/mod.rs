use serde::{Deserialize, Serialize};
use std::sync::RwLock;

// ─── Budget state ────────────────────────────────────────────────────────────

/// Derived phase of the session budget. Read by the executor before each
/// paid step; the sole authority for tier eligibility.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BudgetPhase {
    Normal,
    SoftLimit,
    HardLimit,
}

/// Snapshot of the governor at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub spent: f64,
    pub limit: f64,
    pub soft_threshold: f64,
    pub phase: BudgetPhase,
}

impl BudgetState {
    pub fn remaining(&self) -> f64 {
        (self.limit - self.spent).max(0.0)
    }
}

// ─── Cost governor ───────────────────────────────────────────────────────────

/// Tracks cumulative session spend and classifies it against the limit.
///
/// One explicitly owned instance per session, handed by `Arc` into the
/// executor. Mutation is serialized through the write lock; concurrent
/// steps read state without blocking each other. `spent` only grows —
/// cancellation never refunds amounts already charged.
#[derive(Debug)]
pub struct CostGovernor {
    limit: f64,
    soft_threshold: f64,
    spent: RwLock<f64>,
}

impl CostGovernor {
    pub const DEFAULT_SOFT_THRESHOLD: f64 = 0.8;

    pub fn new(limit: f64, soft_threshold: f64) -> Self {
        Self {
            limit: limit.max(0.0),
            soft_threshold: soft_threshold.clamp(0.0, 1.0),
            spent: RwLock::new(0.0),
        }
    }

    pub fn with_limit(limit: f64) -> Self {
        Self::new(limit, Self::DEFAULT_SOFT_THRESHOLD)
    }

    /// Attribute `amount` to the session and return the new state.
    /// Negative amounts are ignored, keeping `spent` monotone.
    pub fn charge(&self, amount: f64) -> BudgetState {
        let mut spent = self
            .spent
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if amount > 0.0 {
            *spent += amount;
        }
        let snapshot = self.snapshot(*spent);
        drop(spent);

        if snapshot.phase != BudgetPhase::Normal {
            tracing::warn!(
                spent = snapshot.spent,
                limit = snapshot.limit,
                phase = %snapshot.phase,
                "Budget threshold reached"
            );
        }
        snapshot
    }

    /// Read-only view of the current state.
    pub fn state(&self) -> BudgetState {
        let spent = self
            .spent
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.snapshot(*spent)
    }

    /// Spend summary for logging and the CLI.
    pub fn summary(&self) -> serde_json::Value {
        let state = self.state();
        serde_json::json!({
            "spent": state.spent,
            "limit": state.limit,
            "remaining": state.remaining(),
            "phase": state.phase.to_string(),
        })
    }

    fn snapshot(&self, spent: f64) -> BudgetState {
        let phase = if spent >= self.limit {
            BudgetPhase::HardLimit
        } else if spent >= self.limit * self.soft_threshold {
            BudgetPhase::SoftLimit
        } else {
            BudgetPhase::Normal
        };
        BudgetState {
            spent,
            limit: self.limit,
            soft_threshold: self.soft_threshold,
            phase,
        }
    }
}
