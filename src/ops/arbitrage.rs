//! Cross-venue arbitrage detection and execution
//!
//! Detection probes the same pair on two venues in parallel and measures
//! the relative price discrepancy. Execution is a strict two-leg plan:
//! buy on the cheaper venue, sell on the other. A failed second leg is a
//! materially different outcome from a failed first leg (inventory is
//! held after leg one), so the two are reported distinctly through the
//! partial-execution bookkeeping.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ArbitrageConfig;
use crate::error::{ClassifiedError, ErrorContext, ErrorKind, Result};
use crate::ops::{dec_from_f64, OperationReport, StepTracker};
use crate::protocols::types::{ExecuteRequest, QuoteRequest};
use crate::protocols::RouterProtocol;
use crate::quotes::{Quote, QuotePipeline};
use crate::recovery::RecoveryEngine;
use crate::time::SharedClock;

/// Probe request: one asset priced against a quote asset on two venues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageRequest {
    pub asset: String,
    pub quote_asset: String,
    pub amount: Decimal,
    pub venue_a: String,
    pub venue_b: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_address: Option<String>,
}

/// A detected (not necessarily profitable) price discrepancy.
/// Derived per request, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub asset: String,
    pub quote_asset: String,
    pub amount: Decimal,
    pub venue_a: String,
    pub venue_b: String,
    pub price_a: Decimal,
    pub price_b: Decimal,
    /// |price_a − price_b| / min(price_a, price_b)
    pub discrepancy: f64,
    /// Gross spread minus the gas fraction, in quote-asset terms
    pub estimated_profit: Decimal,
    pub risk_score: f64,
    pub profitable: bool,
}

/// What the two executed legs actually delivered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageOutcome {
    pub opportunity: ArbitrageOpportunity,
    /// Quote-asset spent on the buy leg
    pub cost: Decimal,
    /// Quote-asset received from the sell leg
    pub proceeds: Decimal,
    pub gas_used: Decimal,
    /// proceeds − cost − gas_used
    pub actual_profit: Decimal,
}

pub struct ArbitrageDesk {
    quotes: Arc<QuotePipeline>,
    router: Arc<dyn RouterProtocol>,
    recovery: Arc<RecoveryEngine>,
    config: ArbitrageConfig,
    clock: SharedClock,
}

impl ArbitrageDesk {
    pub fn new(
        quotes: Arc<QuotePipeline>,
        router: Arc<dyn RouterProtocol>,
        recovery: Arc<RecoveryEngine>,
        config: ArbitrageConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            quotes,
            router,
            recovery,
            config,
            clock,
        }
    }

    /// Probe both venues concurrently and size the discrepancy.
    pub async fn detect(&self, request: &ArbitrageRequest) -> Result<ArbitrageOpportunity> {
        let mut probe = QuoteRequest::new(
            request.asset.clone(),
            request.quote_asset.clone(),
            request.amount,
        );
        if let Some(user) = &request.user_address {
            probe = probe.with_user(user.clone());
        }
        let probe_a = probe.clone().with_venue(request.venue_a.clone());
        let probe_b = probe.with_venue(request.venue_b.clone());

        let (quote_a, quote_b) = tokio::join!(
            self.quotes.get_quote(&probe_a),
            self.quotes.get_quote(&probe_b)
        );
        let (quote_a, quote_b) = (quote_a?, quote_b?);

        let price_a = unit_price(&quote_a);
        let price_b = unit_price(&quote_b);
        let low = price_a.min(price_b);
        let high = price_a.max(price_b);

        let discrepancy = ((high - low) / low).to_f64().unwrap_or(0.0);
        let profitable =
            discrepancy > self.config.min_profit_threshold + self.config.gas_cost_fraction;

        let gas_cost = request.amount * low * dec_from_f64(self.config.gas_cost_fraction);
        let estimated_profit = request.amount * (high - low) - gas_cost;

        let risk_score = risk_score(
            quote_a.route.price_impact,
            quote_b.route.price_impact,
            discrepancy,
        );

        info!(
            asset = %request.asset,
            %price_a,
            %price_b,
            discrepancy,
            profitable,
            "arbitrage probe"
        );

        Ok(ArbitrageOpportunity {
            asset: request.asset.clone(),
            quote_asset: request.quote_asset.clone(),
            amount: request.amount,
            venue_a: request.venue_a.clone(),
            venue_b: request.venue_b.clone(),
            price_a,
            price_b,
            discrepancy,
            estimated_profit,
            risk_score,
            profitable,
        })
    }

    /// Execute a detected opportunity: buy on the cheaper venue, then
    /// sell on the other. No automatic unwind — a failure after the buy
    /// leg leaves the inventory with the caller and says so.
    pub async fn execute(
        &self,
        opportunity: &ArbitrageOpportunity,
        user_address: &str,
    ) -> Result<OperationReport<ArbitrageOutcome>> {
        let started_at = self.clock.now();
        if !opportunity.profitable {
            return Err(ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: "opportunity is not profitable at current thresholds".into(),
                },
                self.context(started_at, user_address),
            ));
        }

        let (buy_venue, sell_venue, buy_price) = if opportunity.price_a <= opportunity.price_b {
            (&opportunity.venue_a, &opportunity.venue_b, opportunity.price_a)
        } else {
            (&opportunity.venue_b, &opportunity.venue_a, opportunity.price_b)
        };

        let mut tracker = StepTracker::new(2);

        // Leg one: quote asset in, target asset out, on the cheap venue.
        let cost = opportunity.amount * buy_price;
        let buy_request = QuoteRequest::new(
            opportunity.quote_asset.clone(),
            opportunity.asset.clone(),
            cost,
        )
        .with_venue(buy_venue.clone())
        .with_user(user_address);

        let buy_quote = self
            .quotes
            .get_quote(&buy_request)
            .await
            .map_err(|e| e.with_partial(tracker.partial()))?;
        let buy_tx = self
            .execute_leg(&buy_quote, user_address, &tracker)
            .await?;
        let acquired = buy_quote.route.output_amount;
        tracker.commit("buy_leg", buy_tx.clone());

        // Leg two: sell exactly what leg one delivered, on the other venue.
        let sell_request = QuoteRequest::new(
            opportunity.asset.clone(),
            opportunity.quote_asset.clone(),
            acquired,
        )
        .with_venue(sell_venue.clone())
        .with_user(user_address);

        let sell_quote = self
            .quotes
            .get_quote(&sell_request)
            .await
            .map_err(|e| e.with_partial(tracker.partial()))?;
        let sell_tx = self
            .execute_leg(&sell_quote, user_address, &tracker)
            .await?;
        let proceeds = sell_quote.route.output_amount;
        tracker.commit("sell_leg", sell_tx.clone());

        let gas_used = buy_tx.gas_used + sell_tx.gas_used;
        let actual_profit = proceeds - cost - gas_used;

        if actual_profit < Decimal::ZERO {
            warn!(%actual_profit, "arbitrage closed at a loss");
        }

        Ok(OperationReport {
            operation: "execute_arbitrage".into(),
            operation_id: Uuid::new_v4().to_string(),
            user_address: Some(user_address.to_string()),
            started_at,
            finished_at: self.clock.now(),
            steps: tracker.into_steps(),
            outcome: ArbitrageOutcome {
                opportunity: opportunity.clone(),
                cost,
                proceeds,
                gas_used,
                actual_profit,
            },
        })
    }

    async fn execute_leg(
        &self,
        quote: &Quote,
        user_address: &str,
        tracker: &StepTracker,
    ) -> Result<crate::protocols::types::TxResult> {
        self.router
            .execute(&ExecuteRequest {
                route: quote.route.clone(),
                user_address: user_address.to_string(),
                minimum_amount_out: quote.slippage_adjusted_amount_out,
            })
            .await
            .map_err(|e| {
                self.recovery
                    .classify_client_error(e, self.context(self.clock.now(), user_address))
                    .with_partial(tracker.partial())
            })
    }

    fn context(
        &self,
        at: chrono::DateTime<chrono::Utc>,
        user_address: &str,
    ) -> ErrorContext {
        ErrorContext::at("execute_arbitrage", at).with_user(user_address)
    }
}

fn unit_price(quote: &Quote) -> Decimal {
    quote.route.output_amount / quote.route.input_amount
}

/// Price impact of both probes dominates; outsized spreads add a stale-
/// print penalty, since they are more often bad data than free money.
fn risk_score(impact_a: f64, impact_b: f64, discrepancy: f64) -> f64 {
    let impact = (impact_a + impact_b) * 5.0;
    let staleness = (discrepancy / 0.05).min(1.0) * 0.2;
    (impact + staleness).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QuoteCache;
    use crate::config::{CacheConfig, RetryConfig, SlippageConfig};
    use crate::error::ErrorHistory;
    use crate::protocols::types::{Route, RouteFees, TxResult};
    use crate::protocols::{ClientError, MockRouterProtocol};
    use crate::time::ManualClock;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn priced_route(req: &QuoteRequest, price: Decimal) -> Route {
        let now = Utc::now();
        Route {
            id: format!("{}-{}", req.venue.as_deref().unwrap_or("any"), req.token_in),
            input_token: req.token_in.clone(),
            output_token: req.token_out.clone(),
            input_amount: req.amount_in,
            output_amount: req.amount_in * price,
            price_impact: 0.002,
            execution_price: price,
            minimum_amount_out: req.amount_in * price,
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

    /// Router whose quotes price dex-a at `price_a` and dex-b at
    /// `price_b` for asset→quote, with inverse pricing on the way in.
    fn two_venue_router(price_a: Decimal, price_b: Decimal) -> MockRouterProtocol {
        let mut router = MockRouterProtocol::new();
        router.expect_quote().returning(move |req| {
            let venue_price = match req.venue.as_deref() {
                Some("dex-a") => price_a,
                _ => price_b,
            };
            // buying the asset inverts the price
            let price = if req.token_out == "USDC" {
                venue_price
            } else {
                Decimal::ONE / venue_price
            };
            Ok(priced_route(req, price))
        });
        router
    }

    fn desk(router: MockRouterProtocol) -> ArbitrageDesk {
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
        ArbitrageDesk::new(quotes, router, recovery, ArbitrageConfig::default(), clock)
    }

    fn request() -> ArbitrageRequest {
        ArbitrageRequest {
            asset: "SEI".into(),
            quote_asset: "USDC".into(),
            amount: dec!(1000),
            venue_a: "dex-a".into(),
            venue_b: "dex-b".into(),
            user_address: Some("sei1user".into()),
        }
    }

    #[tokio::test]
    async fn two_percent_spread_is_profitable_over_default_thresholds() {
        let desk = desk(two_venue_router(dec!(1.02), dec!(1.00)));
        let opp = desk.detect(&request()).await.unwrap();

        // discrepancy 0.02 > 0.01 threshold + 0.001 gas fraction
        assert!(opp.profitable);
        assert!(opp.discrepancy > 0.011);
        assert!(opp.estimated_profit > Decimal::ZERO);
    }

    #[tokio::test]
    async fn sub_threshold_spread_is_not_profitable() {
        let desk = desk(two_venue_router(dec!(1.005), dec!(1.00)));
        let opp = desk.detect(&request()).await.unwrap();
        assert!(!opp.profitable);
    }

    #[tokio::test]
    async fn executing_unprofitable_opportunity_is_rejected() {
        let desk = desk(two_venue_router(dec!(1.001), dec!(1.00)));
        let opp = desk.detect(&request()).await.unwrap();

        let err = desk.execute(&opp, "sei1user").await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn successful_execution_reports_both_legs_and_profit() {
        let mut router = two_venue_router(dec!(1.02), dec!(1.00));
        router.expect_execute().times(2).returning(|req| {
            Ok(TxResult {
                tx_hash: format!("0x{}", req.route.id),
                gas_used: dec!(1),
            })
        });
        let desk = desk(router);

        let opp = desk.detect(&request()).await.unwrap();
        let report = desk.execute(&opp, "sei1user").await.unwrap();

        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].step, "buy_leg");
        assert_eq!(report.steps[1].step, "sell_leg");
        // bought 1000 SEI for 1000 USDC on dex-b, sold at 1.02 on dex-a,
        // minus 2 units of gas
        assert_eq!(report.outcome.cost, dec!(1000));
        assert_eq!(report.outcome.proceeds, dec!(1020));
        assert_eq!(report.outcome.actual_profit, dec!(18));
    }

    #[tokio::test]
    async fn failed_second_leg_reports_one_committed_step() {
        let mut router = two_venue_router(dec!(1.02), dec!(1.00));
        let mut calls = 0u32;
        router.expect_execute().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(TxResult {
                    tx_hash: "0xbuy".into(),
                    gas_used: dec!(1),
                })
            } else {
                Err(ClientError::Rejected {
                    code: "400".into(),
                    message: "min out not met".into(),
                })
            }
        });
        let desk = desk(router);

        let opp = desk.detect(&request()).await.unwrap();
        let err = desk.execute(&opp, "sei1user").await.unwrap_err();

        let partial = err.partial.expect("partial execution attached");
        assert_eq!(partial.steps_planned, 2);
        assert_eq!(partial.steps_committed, 1);
        assert_eq!(partial.transactions[0].step, "buy_leg");
    }

    #[tokio::test]
    async fn failed_first_leg_reports_nothing_committed() {
        let mut router = two_venue_router(dec!(1.02), dec!(1.00));
        router.expect_execute().times(1).returning(|_| {
            Err(ClientError::Rejected {
                code: "400".into(),
                message: "nonce too low".into(),
            })
        });
        let desk = desk(router);

        let opp = desk.detect(&request()).await.unwrap();
        let err = desk.execute(&opp, "sei1user").await.unwrap_err();

        let partial = err.partial.expect("partial execution attached");
        assert!(partial.nothing_committed());
        assert_eq!(partial.steps_planned, 2);
    }

    #[test]
    fn risk_score_is_bounded() {
        assert!(risk_score(0.5, 0.5, 0.5) <= 1.0);
        assert!(risk_score(0.0, 0.0, 0.0) >= 0.0);
        // heavier impact raises risk
        assert!(risk_score(0.05, 0.05, 0.01) > risk_score(0.001, 0.001, 0.01));
    }
}
