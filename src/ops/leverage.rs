//! Leveraged position lifecycle
//!
//! Opening is a strict supply → borrow → swap plan; unwinding is the
//! exact inverse, swap → repay → withdraw. The health factor is always
//! re-read from the lending protocol after state-changing steps, never
//! carried across steps as a cached value. A position that lands at or
//! below the liquidation bound is reported as a failed operation even
//! when every individual step committed; compensating steps are the
//! caller's decision.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ClassifiedError, ErrorContext, ErrorKind, Result};
use crate::ops::{dec_from_f64, OperationReport, StepTracker};
use crate::protocols::types::{ExecuteRequest, LendingRequest, QuoteRequest, TxResult};
use crate::protocols::{LendingProtocol, RouterProtocol};
use crate::quotes::QuotePipeline;
use crate::recovery::RecoveryEngine;
use crate::time::SharedClock;

/// Health factors within this band of the target are left alone.
const HF_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeverageRequest {
    pub user_address: String,
    pub collateral_asset: String,
    pub collateral_amount: Decimal,
    /// Asset borrowed against the collateral
    pub borrow_asset: String,
    /// Asset the borrow is swapped into
    pub target_asset: String,
    /// Total exposure over posted collateral; 1.0 means no borrow
    pub leverage_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeveragePosition {
    pub user_address: String,
    pub collateral_asset: String,
    pub collateral_amount: Decimal,
    pub target_asset: String,
    pub leverage_ratio: f64,
    pub borrowed_amount: Decimal,
    /// Authoritative value re-read from the lending protocol after the
    /// final step
    pub health_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceOutcome {
    pub previous_health_factor: f64,
    pub target_health_factor: f64,
    pub new_health_factor: f64,
    /// False when the position was already within tolerance (no steps run)
    pub adjusted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnwindRequest {
    pub user_address: String,
    pub collateral_asset: String,
    pub borrow_asset: String,
    pub target_asset: String,
    /// Target-asset holdings to swap back toward the debt
    pub target_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnwindOutcome {
    /// Borrow-asset obtained by the swap leg
    pub swapped_out: Decimal,
    pub repaid: Decimal,
    pub withdrawn: Decimal,
    pub health_factor: f64,
}

pub struct LeverageDesk {
    quotes: Arc<QuotePipeline>,
    router: Arc<dyn RouterProtocol>,
    lending: Arc<dyn LendingProtocol>,
    recovery: Arc<RecoveryEngine>,
    clock: SharedClock,
}

impl LeverageDesk {
    pub fn new(
        quotes: Arc<QuotePipeline>,
        router: Arc<dyn RouterProtocol>,
        lending: Arc<dyn LendingProtocol>,
        recovery: Arc<RecoveryEngine>,
        clock: SharedClock,
    ) -> Self {
        Self {
            quotes,
            router,
            lending,
            recovery,
            clock,
        }
    }

    fn context(&self, operation: &str, user_address: &str) -> ErrorContext {
        ErrorContext::at(operation, self.clock.now()).with_user(user_address)
    }

    /// Open a leveraged position: supply, borrow, swap, in that order.
    /// Supply must commit before borrow is attempted, borrow before swap.
    pub async fn open(
        &self,
        request: &LeverageRequest,
    ) -> Result<OperationReport<LeveragePosition>> {
        let started_at = self.clock.now();
        let user = &request.user_address;

        if request.leverage_ratio < 1.0 {
            return Err(ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: format!("leverage ratio {} below 1.0", request.leverage_ratio),
                },
                self.context("open_leverage", user),
            ));
        }
        if request.collateral_amount <= Decimal::ZERO {
            return Err(ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: "collateral amount must be positive".into(),
                },
                self.context("open_leverage", user),
            ));
        }

        let borrowed_amount =
            request.collateral_amount * dec_from_f64(request.leverage_ratio - 1.0);
        let planned = if borrowed_amount > Decimal::ZERO { 3 } else { 1 };
        let mut tracker = StepTracker::new(planned);

        let supply_tx = self
            .lending_step(
                "open_leverage",
                user,
                &tracker,
                self.lending.supply(&LendingRequest {
                    asset: request.collateral_asset.clone(),
                    amount: request.collateral_amount,
                    user_address: user.clone(),
                }),
            )
            .await?;
        tracker.commit("supply", supply_tx);

        if borrowed_amount > Decimal::ZERO {
            let borrow_tx = self
                .lending_step(
                    "open_leverage",
                    user,
                    &tracker,
                    self.lending.borrow(&LendingRequest {
                        asset: request.borrow_asset.clone(),
                        amount: borrowed_amount,
                        user_address: user.clone(),
                    }),
                )
                .await?;
            tracker.commit("borrow", borrow_tx);

            let swap_tx = self
                .swap_step(
                    "open_leverage",
                    user,
                    &tracker,
                    &request.borrow_asset,
                    &request.target_asset,
                    borrowed_amount,
                )
                .await?;
            tracker.commit("swap", swap_tx);
        }

        let health_factor = self
            .read_health_factor("open_leverage", user, &tracker)
            .await?;

        if health_factor <= 1.0 {
            warn!(%user, health_factor, "leverage open landed below liquidation bound");
            return Err(ClassifiedError::classify(
                ErrorKind::HealthFactorTooLow { health_factor },
                self.context("open_leverage", user),
            )
            .with_partial(tracker.partial()));
        }

        info!(%user, health_factor, %borrowed_amount, "leverage position opened");

        Ok(OperationReport {
            operation: "open_leverage".into(),
            operation_id: Uuid::new_v4().to_string(),
            user_address: Some(user.clone()),
            started_at,
            finished_at: self.clock.now(),
            steps: tracker.into_steps(),
            outcome: LeveragePosition {
                user_address: user.clone(),
                collateral_asset: request.collateral_asset.clone(),
                collateral_amount: request.collateral_amount,
                target_asset: request.target_asset.clone(),
                leverage_ratio: request.leverage_ratio,
                borrowed_amount,
                health_factor,
            },
        })
    }

    /// Move an open position toward a target health factor. The current
    /// position is re-read from the lending protocol first; a cached
    /// health factor is never trusted.
    pub async fn rebalance(
        &self,
        user_address: &str,
        borrow_asset: &str,
        target_health_factor: f64,
    ) -> Result<OperationReport<RebalanceOutcome>> {
        let started_at = self.clock.now();
        if target_health_factor <= 1.0 {
            return Err(ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: format!("target health factor {target_health_factor} must exceed 1.0"),
                },
                self.context("rebalance_leverage", user_address),
            ));
        }

        let position = self
            .lending
            .user_position(user_address)
            .await
            .map_err(|e| {
                self.recovery
                    .classify_client_error(e, self.context("rebalance_leverage", user_address))
            })?;

        let previous = position.health_factor;
        let total_borrowed = position.total_borrowed();
        let mut tracker = StepTracker::new(1);

        let within_band = (previous - target_health_factor).abs() <= HF_TOLERANCE;
        if within_band || total_borrowed == Decimal::ZERO {
            return Ok(OperationReport {
                operation: "rebalance_leverage".into(),
                operation_id: Uuid::new_v4().to_string(),
                user_address: Some(user_address.to_string()),
                started_at,
                finished_at: self.clock.now(),
                steps: Vec::new(),
                outcome: RebalanceOutcome {
                    previous_health_factor: previous,
                    target_health_factor,
                    new_health_factor: previous,
                    adjusted: false,
                },
            });
        }

        if previous < target_health_factor {
            // Debt scales health inversely: repay the proportional excess.
            let repay_amount =
                total_borrowed * dec_from_f64(1.0 - previous / target_health_factor);
            let tx = self
                .lending_step(
                    "rebalance_leverage",
                    user_address,
                    &tracker,
                    self.lending.repay(&LendingRequest {
                        asset: borrow_asset.to_string(),
                        amount: repay_amount,
                        user_address: user_address.to_string(),
                    }),
                )
                .await?;
            tracker.commit("repay", tx);
        } else {
            let extra_borrow =
                total_borrowed * dec_from_f64(previous / target_health_factor - 1.0);
            let tx = self
                .lending_step(
                    "rebalance_leverage",
                    user_address,
                    &tracker,
                    self.lending.borrow(&LendingRequest {
                        asset: borrow_asset.to_string(),
                        amount: extra_borrow,
                        user_address: user_address.to_string(),
                    }),
                )
                .await?;
            tracker.commit("borrow", tx);
        }

        let new_health_factor = self
            .read_health_factor("rebalance_leverage", user_address, &tracker)
            .await?;

        info!(
            user = %user_address,
            previous,
            new = new_health_factor,
            "leverage position rebalanced"
        );

        Ok(OperationReport {
            operation: "rebalance_leverage".into(),
            operation_id: Uuid::new_v4().to_string(),
            user_address: Some(user_address.to_string()),
            started_at,
            finished_at: self.clock.now(),
            steps: tracker.into_steps(),
            outcome: RebalanceOutcome {
                previous_health_factor: previous,
                target_health_factor,
                new_health_factor,
                adjusted: true,
            },
        })
    }

    /// Close a position: swap → repay → withdraw, the strict inverse of
    /// the opening order.
    pub async fn unwind(
        &self,
        request: &UnwindRequest,
    ) -> Result<OperationReport<UnwindOutcome>> {
        let started_at = self.clock.now();
        let user = &request.user_address;

        let position = self.lending.user_position(user).await.map_err(|e| {
            self.recovery
                .classify_client_error(e, self.context("unwind_leverage", user))
        })?;

        let debt: Decimal = position
            .borrowed
            .iter()
            .filter(|e| e.asset == request.borrow_asset)
            .map(|e| e.amount)
            .sum();
        let supplied: Decimal = position
            .supplied
            .iter()
            .filter(|e| e.asset == request.collateral_asset)
            .map(|e| e.amount)
            .sum();

        if debt == Decimal::ZERO && supplied == Decimal::ZERO {
            return Err(ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: format!("no position to unwind for {user}"),
                },
                self.context("unwind_leverage", user),
            ));
        }

        let has_debt = debt > Decimal::ZERO;
        let planned = if has_debt { 3 } else { 1 };
        let mut tracker = StepTracker::new(planned);

        let mut swapped_out = Decimal::ZERO;
        let mut repaid = Decimal::ZERO;

        if has_debt {
            let quote_request = QuoteRequest::new(
                request.target_asset.clone(),
                request.borrow_asset.clone(),
                request.target_amount,
            )
            .with_user(user.clone());
            let quote = self
                .quotes
                .get_quote(&quote_request)
                .await
                .map_err(|e| e.with_partial(tracker.partial()))?;
            swapped_out = quote.route.output_amount;

            let swap_tx = self
                .router
                .execute(&ExecuteRequest {
                    route: quote.route.clone(),
                    user_address: user.clone(),
                    minimum_amount_out: quote.slippage_adjusted_amount_out,
                })
                .await
                .map_err(|e| {
                    self.recovery
                        .classify_client_error(e, self.context("unwind_leverage", user))
                        .with_partial(tracker.partial())
                })?;
            tracker.commit("swap", swap_tx);

            repaid = debt.min(swapped_out);
            let repay_tx = self
                .lending_step(
                    "unwind_leverage",
                    user,
                    &tracker,
                    self.lending.repay(&LendingRequest {
                        asset: request.borrow_asset.clone(),
                        amount: repaid,
                        user_address: user.clone(),
                    }),
                )
                .await?;
            tracker.commit("repay", repay_tx);
        }

        let withdraw_tx = self
            .lending_step(
                "unwind_leverage",
                user,
                &tracker,
                self.lending.withdraw(&LendingRequest {
                    asset: request.collateral_asset.clone(),
                    amount: supplied,
                    user_address: user.clone(),
                }),
            )
            .await?;
        tracker.commit("withdraw", withdraw_tx);

        let health_factor = self
            .read_health_factor("unwind_leverage", user, &tracker)
            .await?;

        info!(%user, %repaid, withdrawn = %supplied, "leverage position unwound");

        Ok(OperationReport {
            operation: "unwind_leverage".into(),
            operation_id: Uuid::new_v4().to_string(),
            user_address: Some(user.clone()),
            started_at,
            finished_at: self.clock.now(),
            steps: tracker.into_steps(),
            outcome: UnwindOutcome {
                swapped_out,
                repaid,
                withdrawn: supplied,
                health_factor,
            },
        })
    }

    async fn lending_step(
        &self,
        operation: &str,
        user: &str,
        tracker: &StepTracker,
        call: impl std::future::Future<
            Output = std::result::Result<TxResult, crate::protocols::ClientError>,
        >,
    ) -> Result<TxResult> {
        call.await.map_err(|e| {
            self.recovery
                .classify_client_error(e, self.context(operation, user))
                .with_partial(tracker.partial())
        })
    }

    async fn swap_step(
        &self,
        operation: &str,
        user: &str,
        tracker: &StepTracker,
        token_in: &str,
        token_out: &str,
        amount: Decimal,
    ) -> Result<TxResult> {
        let quote_request = QuoteRequest::new(token_in, token_out, amount).with_user(user);
        let quote = self
            .quotes
            .get_quote(&quote_request)
            .await
            .map_err(|e| e.with_partial(tracker.partial()))?;

        self.router
            .execute(&ExecuteRequest {
                route: quote.route.clone(),
                user_address: user.to_string(),
                minimum_amount_out: quote.slippage_adjusted_amount_out,
            })
            .await
            .map_err(|e| {
                self.recovery
                    .classify_client_error(e, self.context(operation, user))
                    .with_partial(tracker.partial())
            })
    }

    async fn read_health_factor(
        &self,
        operation: &str,
        user: &str,
        tracker: &StepTracker,
    ) -> Result<f64> {
        self.lending.health_factor(user).await.map_err(|e| {
            self.recovery
                .classify_client_error(e, self.context(operation, user))
                .with_partial(tracker.partial())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QuoteCache;
    use crate::config::{CacheConfig, RetryConfig, SlippageConfig};
    use crate::error::ErrorHistory;
    use crate::protocols::types::{Position, PositionEntry, Route, RouteFees};
    use crate::protocols::{ClientError, MockLendingProtocol, MockRouterProtocol};
    use crate::time::ManualClock;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn tx(hash: &str) -> TxResult {
        TxResult {
            tx_hash: hash.into(),
            gas_used: dec!(0.01),
        }
    }

    fn passthrough_route(req: &QuoteRequest) -> Route {
        let now = Utc::now();
        Route {
            id: "swap-route".into(),
            input_token: req.token_in.clone(),
            output_token: req.token_out.clone(),
            input_amount: req.amount_in,
            output_amount: req.amount_in,
            price_impact: 0.001,
            execution_price: Decimal::ONE,
            minimum_amount_out: req.amount_in,
            steps: vec![],
            gas_estimate: dec!(0.01),
            fees: RouteFees {
                protocol: Decimal::ZERO,
                gas: Decimal::ZERO,
                liquidity_provider: Decimal::ZERO,
                total: Decimal::ZERO,
            },
            issued_at: now,
            valid_until: now + Duration::seconds(30),
        }
    }

    fn desk(router: MockRouterProtocol, lending: MockLendingProtocol) -> LeverageDesk {
        let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
        let recovery = Arc::new(RecoveryEngine::new(
            RetryConfig {
                network_delay_ms: 1,
                jitter_ms: 0,
                ..Default::default()
            },
            Arc::new(ErrorHistory::new(16)),
        ));
        let router: Arc<dyn RouterProtocol> = Arc::new(router);
        let quotes = Arc::new(QuotePipeline::new(
            router.clone(),
            Arc::new(QuoteCache::new(CacheConfig::default(), clock.clone())),
            recovery.clone(),
            CacheConfig::default(),
            SlippageConfig::default(),
            clock.clone(),
        ));
        LeverageDesk::new(quotes, router, Arc::new(lending), recovery, clock)
    }

    fn open_request(ratio: f64) -> LeverageRequest {
        LeverageRequest {
            user_address: "sei1user".into(),
            collateral_asset: "USDC".into(),
            collateral_amount: dec!(1000),
            borrow_asset: "USDT".into(),
            target_asset: "SEI".into(),
            leverage_ratio: ratio,
        }
    }

    #[tokio::test]
    async fn open_runs_supply_borrow_swap_in_order() {
        let mut router = MockRouterProtocol::new();
        router
            .expect_quote()
            .returning(|req| Ok(passthrough_route(req)));
        router.expect_execute().returning(|_| Ok(tx("0xswap")));

        let mut lending = MockLendingProtocol::new();
        lending.expect_supply().times(1).returning(|_| Ok(tx("0xsupply")));
        lending.expect_borrow().times(1).returning(|req| {
            assert_eq!(req.amount, dec!(1000));
            Ok(tx("0xborrow"))
        });
        lending.expect_health_factor().returning(|_| Ok(1.8));

        let desk = desk(router, lending);
        let report = desk.open(&open_request(2.0)).await.unwrap();

        let steps: Vec<&str> = report.steps.iter().map(|s| s.step.as_str()).collect();
        assert_eq!(steps, vec!["supply", "borrow", "swap"]);
        // borrowed = collateral × (ratio − 1)
        assert_eq!(report.outcome.borrowed_amount, dec!(1000));
        assert!(report.outcome.health_factor > 1.0);
    }

    #[tokio::test]
    async fn ratio_below_one_is_rejected_before_any_step() {
        let desk = desk(MockRouterProtocol::new(), MockLendingProtocol::new());
        let err = desk.open(&open_request(0.5)).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn ratio_of_exactly_one_supplies_without_borrowing() {
        let mut lending = MockLendingProtocol::new();
        lending.expect_supply().times(1).returning(|_| Ok(tx("0xsupply")));
        lending.expect_health_factor().returning(|_| Ok(5.0));

        let desk = desk(MockRouterProtocol::new(), lending);
        let report = desk.open(&open_request(1.0)).await.unwrap();

        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.outcome.borrowed_amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn low_health_factor_fails_open_with_all_steps_committed() {
        let mut router = MockRouterProtocol::new();
        router
            .expect_quote()
            .returning(|req| Ok(passthrough_route(req)));
        router.expect_execute().returning(|_| Ok(tx("0xswap")));

        let mut lending = MockLendingProtocol::new();
        lending.expect_supply().returning(|_| Ok(tx("0xsupply")));
        lending.expect_borrow().returning(|_| Ok(tx("0xborrow")));
        lending.expect_health_factor().returning(|_| Ok(0.95));

        let desk = desk(router, lending);
        let err = desk.open(&open_request(3.0)).await.unwrap_err();

        assert!(matches!(err.kind, ErrorKind::HealthFactorTooLow { .. }));
        let partial = err.partial.expect("partial attached");
        assert_eq!(partial.steps_committed, 3);
        assert_eq!(partial.steps_planned, 3);
    }

    #[tokio::test]
    async fn failed_borrow_reports_only_supply_committed() {
        let mut lending = MockLendingProtocol::new();
        lending.expect_supply().returning(|_| Ok(tx("0xsupply")));
        lending.expect_borrow().returning(|_| {
            Err(ClientError::Rejected {
                code: "400".into(),
                message: "collateral too thin".into(),
            })
        });

        let desk = desk(MockRouterProtocol::new(), lending);
        let err = desk.open(&open_request(2.0)).await.unwrap_err();

        let partial = err.partial.expect("partial attached");
        assert_eq!(partial.steps_committed, 1);
        assert_eq!(partial.transactions[0].step, "supply");
    }

    #[tokio::test]
    async fn rebalance_below_target_repays_and_rereads_health() {
        let mut lending = MockLendingProtocol::new();
        lending.expect_user_position().returning(|user| {
            Ok(Position {
                user_address: user.to_string(),
                supplied: vec![PositionEntry {
                    asset: "USDC".into(),
                    amount: dec!(1000),
                    apy: 0.03,
                }],
                borrowed: vec![PositionEntry {
                    asset: "USDT".into(),
                    amount: dec!(800),
                    apy: 0.05,
                }],
                health_factor: 1.2,
            })
        });
        lending.expect_repay().times(1).returning(|req| {
            // 800 × (1 − 1.2/1.5) ≈ 160
            assert!((req.amount - dec!(160)).abs() < dec!(0.001));
            Ok(tx("0xrepay"))
        });
        lending.expect_health_factor().returning(|_| Ok(1.5));

        let desk = desk(MockRouterProtocol::new(), lending);
        let report = desk.rebalance("sei1user", "USDT", 1.5).await.unwrap();

        assert!(report.outcome.adjusted);
        assert_eq!(report.steps[0].step, "repay");
        assert!((report.outcome.new_health_factor - 1.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn rebalance_within_tolerance_is_a_no_op() {
        let mut lending = MockLendingProtocol::new();
        lending.expect_user_position().returning(|user| {
            Ok(Position {
                user_address: user.to_string(),
                supplied: vec![],
                borrowed: vec![PositionEntry {
                    asset: "USDT".into(),
                    amount: dec!(800),
                    apy: 0.05,
                }],
                health_factor: 1.52,
            })
        });

        let desk = desk(MockRouterProtocol::new(), lending);
        let report = desk.rebalance("sei1user", "USDT", 1.5).await.unwrap();

        assert!(!report.outcome.adjusted);
        assert!(report.steps.is_empty());
    }

    #[tokio::test]
    async fn unwind_runs_swap_repay_withdraw_in_order() {
        let mut router = MockRouterProtocol::new();
        router
            .expect_quote()
            .returning(|req| Ok(passthrough_route(req)));
        router.expect_execute().returning(|_| Ok(tx("0xswap")));

        let mut lending = MockLendingProtocol::new();
        lending.expect_user_position().returning(|user| {
            Ok(Position {
                user_address: user.to_string(),
                supplied: vec![PositionEntry {
                    asset: "USDC".into(),
                    amount: dec!(1000),
                    apy: 0.03,
                }],
                borrowed: vec![PositionEntry {
                    asset: "USDT".into(),
                    amount: dec!(500),
                    apy: 0.05,
                }],
                health_factor: 1.4,
            })
        });
        lending.expect_repay().times(1).returning(|req| {
            assert_eq!(req.amount, dec!(500));
            Ok(tx("0xrepay"))
        });
        lending.expect_withdraw().times(1).returning(|req| {
            assert_eq!(req.amount, dec!(1000));
            Ok(tx("0xwithdraw"))
        });
        lending.expect_health_factor().returning(|_| Ok(10.0));

        let desk = desk(router, lending);
        let report = desk
            .unwind(&UnwindRequest {
                user_address: "sei1user".into(),
                collateral_asset: "USDC".into(),
                borrow_asset: "USDT".into(),
                target_asset: "SEI".into(),
                target_amount: dec!(600),
            })
            .await
            .unwrap();

        let steps: Vec<&str> = report.steps.iter().map(|s| s.step.as_str()).collect();
        assert_eq!(steps, vec!["swap", "repay", "withdraw"]);
        assert_eq!(report.outcome.repaid, dec!(500));
        assert_eq!(report.outcome.withdrawn, dec!(1000));
    }

    #[tokio::test]
    async fn unwind_with_no_position_is_rejected() {
        let mut lending = MockLendingProtocol::new();
        lending.expect_user_position().returning(|user| {
            Ok(Position {
                user_address: user.to_string(),
                supplied: vec![],
                borrowed: vec![],
                health_factor: 0.0,
            })
        });

        let desk = desk(MockRouterProtocol::new(), lending);
        let err = desk
            .unwind(&UnwindRequest {
                user_address: "sei1user".into(),
                collateral_asset: "USDC".into(),
                borrow_asset: "USDT".into(),
                target_asset: "SEI".into(),
                target_amount: dec!(0),
            })
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ValidationFailed { .. }));
    }
}
