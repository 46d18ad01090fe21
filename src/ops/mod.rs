//! Composite operation sequencer
//!
//! Multi-step plans over the two protocols: arbitrage, leveraged
//! positions and yield allocation. Each plan is a fixed-order sequence of
//! protocol calls with no automatic rollback — a failure aborts the
//! remaining steps and reports exactly which steps committed, so callers
//! can tell "nothing happened" apart from "partially committed".

pub mod arbitrage;
pub mod leverage;
pub mod yield_alloc;

pub use arbitrage::{ArbitrageDesk, ArbitrageOpportunity, ArbitrageOutcome, ArbitrageRequest};
pub use leverage::{
    LeverageDesk, LeveragePosition, LeverageRequest, RebalanceOutcome, UnwindOutcome,
    UnwindRequest,
};
pub use yield_alloc::{
    AllocationSlice, Holding, RiskTolerance, VenueYield, YieldOptimizer, YieldPlan,
};

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{PartialExecution, StepTransaction};
use crate::protocols::types::TxResult;

/// Lossy f64 → Decimal for config fractions and ratios; non-finite
/// inputs collapse to zero.
pub(crate) fn dec_from_f64(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

/// One committed step of a composite operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub tx: TxResult,
}

/// Success report for a composite operation: the committed steps in
/// order, plus the operation-specific outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationReport<T> {
    pub operation: String,
    pub operation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_address: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
    pub outcome: T,
}

/// Tracks which steps of a fixed plan have committed, so failures can
/// carry accurate partial-execution bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct StepTracker {
    planned: usize,
    committed: Vec<StepRecord>,
}

impl StepTracker {
    pub fn new(planned: usize) -> Self {
        Self {
            planned,
            committed: Vec::new(),
        }
    }

    pub fn commit(&mut self, step: impl Into<String>, tx: TxResult) {
        self.committed.push(StepRecord {
            step: step.into(),
            tx,
        });
    }

    pub fn partial(&self) -> PartialExecution {
        PartialExecution {
            steps_planned: self.planned,
            steps_committed: self.committed.len(),
            transactions: self
                .committed
                .iter()
                .map(|s| StepTransaction {
                    step: s.step.clone(),
                    tx_hash: s.tx.tx_hash.clone(),
                })
                .collect(),
        }
    }

    pub fn into_steps(self) -> Vec<StepRecord> {
        self.committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tracker_reports_committed_steps_in_order() {
        let mut tracker = StepTracker::new(3);
        tracker.commit(
            "supply",
            TxResult {
                tx_hash: "0xaaa".into(),
                gas_used: dec!(0.01),
            },
        );
        tracker.commit(
            "borrow",
            TxResult {
                tx_hash: "0xbbb".into(),
                gas_used: dec!(0.02),
            },
        );

        let partial = tracker.partial();
        assert_eq!(partial.steps_planned, 3);
        assert_eq!(partial.steps_committed, 2);
        assert_eq!(partial.transactions[0].step, "supply");
        assert_eq!(partial.transactions[1].tx_hash, "0xbbb");
        assert!(!partial.nothing_committed());
    }
}
