//! Yield allocation planning
//!
//! Pure planning over a venue yield table: holdings are assigned to the
//! risk-admissible venue set, diversifying away from concentrated risk
//! when that does not cost yield. The plan is advisory — no protocol
//! writes happen here. Per-asset percentages always sum to 100 (±0.1)
//! and the blended APY never falls below the per-asset best-venue
//! baseline; when no allocation improves on the baseline, the baseline
//! itself is returned unchanged.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ClassifiedError, ErrorContext, ErrorKind, Result};
use crate::protocols::LendingProtocol;
use crate::recovery::{RecoveryEngine, RetryState};
use crate::time::SharedClock;

/// Venue of last resort: idle holdings earn nothing but carry no risk.
const WALLET_VENUE: &str = "wallet";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub asset: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Conservative,
    Balanced,
    Aggressive,
}

impl RiskTolerance {
    /// Venues riskier than this are excluded from the universe.
    pub fn max_risk_score(self) -> f64 {
        match self {
            RiskTolerance::Conservative => 0.3,
            RiskTolerance::Balanced => 0.6,
            RiskTolerance::Aggressive => 1.0,
        }
    }

    /// Above this venue risk the planner tries to split the position
    /// rather than concentrate it.
    fn concentration_bound(self) -> f64 {
        match self {
            RiskTolerance::Conservative => 0.15,
            RiskTolerance::Balanced => 0.4,
            RiskTolerance::Aggressive => 1.0,
        }
    }
}

/// One venue's yield offer for one asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueYield {
    pub venue: String,
    pub asset: String,
    /// Fractional APY (0.05 = 5%)
    pub apy: f64,
    /// Venue risk in [0, 1]
    pub risk_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationSlice {
    pub asset: String,
    pub venue: String,
    /// Share of this asset's amount, percent
    pub percentage: f64,
    pub expected_apy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YieldPlan {
    pub allocations: Vec<AllocationSlice>,
    /// Amount-weighted APY of the returned allocation
    pub blended_apy: f64,
    /// Amount-weighted APY with every asset in its single best venue
    pub baseline_apy: f64,
    pub improves_on_baseline: bool,
}

/// Build the allocation plan. Pure; the venue table is the caller's
/// snapshot of the market.
pub fn plan(
    holdings: &[Holding],
    venues: &[VenueYield],
    tolerance: RiskTolerance,
) -> Result<YieldPlan> {
    if holdings.is_empty() {
        return Err(ClassifiedError::classify(
            ErrorKind::ValidationFailed {
                detail: "no holdings to allocate".into(),
            },
            ErrorContext::new("optimize_yield"),
        ));
    }
    for holding in holdings {
        if holding.amount <= Decimal::ZERO {
            return Err(ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: format!("non-positive amount for {}", holding.asset),
                },
                ErrorContext::new("optimize_yield"),
            ));
        }
    }

    let total: Decimal = holdings.iter().map(|h| h.amount).sum();
    let total_f = total.to_f64().unwrap_or(0.0);

    let mut candidate: Vec<AllocationSlice> = Vec::new();
    let mut baseline: Vec<AllocationSlice> = Vec::new();
    let mut candidate_weighted = 0.0;
    let mut baseline_weighted = 0.0;

    for holding in holdings {
        let weight = holding.amount.to_f64().unwrap_or(0.0) / total_f;

        let mut allowed: Vec<&VenueYield> = venues
            .iter()
            .filter(|v| v.asset == holding.asset && v.risk_score <= tolerance.max_risk_score())
            .collect();
        allowed.sort_by(|a, b| b.apy.partial_cmp(&a.apy).unwrap_or(std::cmp::Ordering::Equal));

        let Some(best) = allowed.first().copied() else {
            // Nothing admissible: the asset stays idle.
            let slice = AllocationSlice {
                asset: holding.asset.clone(),
                venue: WALLET_VENUE.into(),
                percentage: 100.0,
                expected_apy: 0.0,
            };
            candidate.push(slice.clone());
            baseline.push(slice);
            continue;
        };

        baseline.push(AllocationSlice {
            asset: holding.asset.clone(),
            venue: best.venue.clone(),
            percentage: 100.0,
            expected_apy: best.apy,
        });
        baseline_weighted += weight * best.apy;

        let second = allowed.get(1).copied();
        let split = best.risk_score > tolerance.concentration_bound() && second.is_some();
        if split {
            let second = second.unwrap();
            for venue in [best, second] {
                candidate.push(AllocationSlice {
                    asset: holding.asset.clone(),
                    venue: venue.venue.clone(),
                    percentage: 50.0,
                    expected_apy: venue.apy,
                });
            }
            candidate_weighted += weight * (best.apy + second.apy) / 2.0;
        } else {
            candidate.push(AllocationSlice {
                asset: holding.asset.clone(),
                venue: best.venue.clone(),
                percentage: 100.0,
                expected_apy: best.apy,
            });
            candidate_weighted += weight * best.apy;
        }
    }

    // A diversified plan that gives up yield is discarded in favour of
    // the baseline.
    if candidate_weighted + f64::EPSILON < baseline_weighted {
        return Ok(YieldPlan {
            allocations: baseline,
            blended_apy: baseline_weighted,
            baseline_apy: baseline_weighted,
            improves_on_baseline: false,
        });
    }

    Ok(YieldPlan {
        improves_on_baseline: candidate_weighted > baseline_weighted + f64::EPSILON,
        allocations: candidate,
        blended_apy: candidate_weighted,
        baseline_apy: baseline_weighted,
    })
}

/// Fetches the lending market and plans against it plus the wallet.
pub struct YieldOptimizer {
    lending: Arc<dyn LendingProtocol>,
    recovery: Arc<RecoveryEngine>,
    clock: SharedClock,
}

impl YieldOptimizer {
    pub fn new(
        lending: Arc<dyn LendingProtocol>,
        recovery: Arc<RecoveryEngine>,
        clock: SharedClock,
    ) -> Self {
        Self {
            lending,
            recovery,
            clock,
        }
    }

    pub async fn optimize(
        &self,
        holdings: &[Holding],
        tolerance: RiskTolerance,
    ) -> Result<YieldPlan> {
        let state = RetryState::new("optimize_yield", None);
        let assets = self
            .recovery
            .run_with_recovery(state, || async {
                self.lending.supported_assets().await.map_err(|e| {
                    self.recovery.classify_client_error(
                        e,
                        ErrorContext::at("optimize_yield", self.clock.now()),
                    )
                })
            })
            .await?;

        let mut venues: Vec<VenueYield> = assets
            .iter()
            .map(|a| VenueYield {
                venue: "lending".into(),
                asset: a.symbol.clone(),
                apy: a.supply_apy,
                risk_score: a.risk_score,
            })
            .collect();
        for holding in holdings {
            venues.push(VenueYield {
                venue: WALLET_VENUE.into(),
                asset: holding.asset.clone(),
                apy: 0.0,
                risk_score: 0.0,
            });
        }

        let result = plan(holdings, &venues, tolerance)?;
        info!(
            blended = result.blended_apy,
            baseline = result.baseline_apy,
            slices = result.allocations.len(),
            "yield plan computed"
        );
        Ok(result)
    }
}
