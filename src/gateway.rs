//! Request/response surface
//!
//! One dispatch point: operation name plus a JSON request in, JSON
//! result or a fully classified error out. Every operation runs under an
//! overall deadline; composite operations get a wider budget than single
//! protocol calls. This is the only layer that touches untyped JSON —
//! everything below works on the typed requests.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::{timeout, Duration};
use tracing::info;

use crate::agents::DecisionAgent;
use crate::cache::QuoteCache;
use crate::config::AppConfig;
use crate::coordinator::{CoordinationRequest, Coordinator};
use crate::error::{ClassifiedError, ErrorContext, ErrorHistory, ErrorKind, Result};
use crate::ops::{
    ArbitrageDesk, ArbitrageOpportunity, ArbitrageRequest, Holding, LeverageDesk,
    LeverageRequest, RiskTolerance, UnwindRequest, YieldOptimizer,
};
use crate::protocols::types::{ExecuteRequest, LendingRequest, QuoteRequest, TxResult};
use crate::protocols::{LendingProtocol, RouterProtocol};
use crate::quotes::QuotePipeline;
use crate::recovery::{RecoveryEngine, RetryState};
use crate::time::SharedClock;

/// Operations the gateway understands
pub const OPERATIONS: &[&str] = &[
    "get_quote",
    "get_routes",
    "estimate_gas",
    "execute_swap",
    "supply",
    "withdraw",
    "borrow",
    "repay",
    "detect_arbitrage",
    "execute_arbitrage",
    "open_leverage",
    "rebalance_leverage",
    "unwind_leverage",
    "optimize_yield",
    "coordinate_agents",
];

/// Deadline multiplier for plans that make several protocol calls
const COMPOSITE_DEADLINE_FACTOR: u64 = 6;

#[derive(Debug, Deserialize)]
struct ExecuteArbitrageRequest {
    opportunity: ArbitrageOpportunity,
    user_address: String,
}

#[derive(Debug, Deserialize)]
struct RebalanceRequest {
    user_address: String,
    borrow_asset: String,
    target_health_factor: f64,
}

#[derive(Debug, Deserialize)]
struct OptimizeYieldRequest {
    holdings: Vec<Holding>,
    risk_tolerance: RiskTolerance,
}

pub struct Gateway {
    config: AppConfig,
    quotes: Arc<QuotePipeline>,
    router: Arc<dyn RouterProtocol>,
    lending: Arc<dyn LendingProtocol>,
    recovery: Arc<RecoveryEngine>,
    arbitrage: ArbitrageDesk,
    leverage: LeverageDesk,
    yields: YieldOptimizer,
    coordinator: Coordinator,
    clock: SharedClock,
}

impl Gateway {
    pub fn new(
        config: AppConfig,
        router: Arc<dyn RouterProtocol>,
        lending: Arc<dyn LendingProtocol>,
        agents: Vec<Arc<dyn DecisionAgent>>,
        clock: SharedClock,
    ) -> Self {
        let history = Arc::new(ErrorHistory::new(64));
        let recovery = Arc::new(RecoveryEngine::new(config.retry.clone(), history));
        let cache = Arc::new(QuoteCache::new(config.cache.clone(), clock.clone()));
        let quotes = Arc::new(QuotePipeline::new(
            router.clone(),
            cache,
            recovery.clone(),
            config.cache.clone(),
            config.slippage.clone(),
            clock.clone(),
        ));
        let arbitrage = ArbitrageDesk::new(
            quotes.clone(),
            router.clone(),
            recovery.clone(),
            config.arbitrage.clone(),
            clock.clone(),
        );
        let leverage = LeverageDesk::new(
            quotes.clone(),
            router.clone(),
            lending.clone(),
            recovery.clone(),
            clock.clone(),
        );
        let yields = YieldOptimizer::new(lending.clone(), recovery.clone(), clock.clone());
        let mut coordinator = Coordinator::new(config.coordination.clone(), clock.clone());
        for agent in agents {
            coordinator.register(agent);
        }

        Self {
            config,
            quotes,
            router,
            lending,
            recovery,
            arbitrage,
            leverage,
            yields,
            coordinator,
            clock,
        }
    }

    /// Dispatch one operation. The request shape depends on the
    /// operation; the response is the operation's result as JSON.
    pub async fn dispatch(&self, operation: &str, request: Value) -> Result<Value> {
        info!(operation, "dispatch");
        match operation {
            "get_quote" => {
                let req: QuoteRequest = self.decode(operation, request)?;
                let result = self
                    .bounded(operation, 1, self.quotes.get_quote(&req))
                    .await?;
                self.encode(operation, &result)
            }
            "get_routes" => {
                let req: QuoteRequest = self.decode(operation, request)?;
                let result = self
                    .bounded(operation, 1, self.quotes.get_routes(&req))
                    .await?;
                self.encode(operation, &result)
            }
            "estimate_gas" => {
                let req: QuoteRequest = self.decode(operation, request)?;
                let result = self
                    .bounded(operation, 1, self.quotes.estimate_gas(&req))
                    .await?;
                self.encode(operation, &result)
            }
            "execute_swap" => {
                let req: ExecuteRequest = self.decode(operation, request)?;
                let result = self.bounded(operation, 1, self.execute_swap(&req)).await?;
                self.encode(operation, &result)
            }
            "supply" | "withdraw" | "borrow" | "repay" => {
                let req: LendingRequest = self.decode(operation, request)?;
                let result = self
                    .bounded(operation, 1, self.lending_call(operation, &req))
                    .await?;
                self.encode(operation, &result)
            }
            "detect_arbitrage" => {
                let req: ArbitrageRequest = self.decode(operation, request)?;
                let result = self
                    .bounded(operation, 2, self.arbitrage.detect(&req))
                    .await?;
                self.encode(operation, &result)
            }
            "execute_arbitrage" => {
                let req: ExecuteArbitrageRequest = self.decode(operation, request)?;
                let result = self
                    .bounded(
                        operation,
                        COMPOSITE_DEADLINE_FACTOR,
                        self.arbitrage.execute(&req.opportunity, &req.user_address),
                    )
                    .await?;
                self.encode(operation, &result)
            }
            "open_leverage" => {
                let req: LeverageRequest = self.decode(operation, request)?;
                let result = self
                    .bounded(operation, COMPOSITE_DEADLINE_FACTOR, self.leverage.open(&req))
                    .await?;
                self.encode(operation, &result)
            }
            "rebalance_leverage" => {
                let req: RebalanceRequest = self.decode(operation, request)?;
                let result = self
                    .bounded(
                        operation,
                        COMPOSITE_DEADLINE_FACTOR,
                        self.leverage.rebalance(
                            &req.user_address,
                            &req.borrow_asset,
                            req.target_health_factor,
                        ),
                    )
                    .await?;
                self.encode(operation, &result)
            }
            "unwind_leverage" => {
                let req: UnwindRequest = self.decode(operation, request)?;
                let result = self
                    .bounded(
                        operation,
                        COMPOSITE_DEADLINE_FACTOR,
                        self.leverage.unwind(&req),
                    )
                    .await?;
                self.encode(operation, &result)
            }
            "optimize_yield" => {
                let req: OptimizeYieldRequest = self.decode(operation, request)?;
                let result = self
                    .bounded(
                        operation,
                        1,
                        self.yields.optimize(&req.holdings, req.risk_tolerance),
                    )
                    .await?;
                self.encode(operation, &result)
            }
            "coordinate_agents" => {
                // The coordinator enforces its own configured deadline.
                let req: CoordinationRequest = self.decode(operation, request)?;
                let result = self.coordinator.coordinate(&req).await?;
                self.encode(operation, &result)
            }
            unknown => Err(ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: format!(
                        "unknown operation '{unknown}'; known operations: {}",
                        OPERATIONS.join(", ")
                    ),
                },
                ErrorContext::at("dispatch", self.clock.now()),
            )),
        }
    }

    async fn execute_swap(&self, request: &ExecuteRequest) -> Result<TxResult> {
        self.router.execute(request).await.map_err(|e| {
            self.recovery.classify_client_error(
                e,
                ErrorContext::at("execute_swap", self.clock.now())
                    .with_user(request.user_address.clone()),
            )
        })
    }

    async fn lending_call(&self, operation: &str, request: &LendingRequest) -> Result<TxResult> {
        let state = RetryState::new(operation, Some(request.user_address.clone()));
        self.recovery
            .run_with_recovery(state, || async {
                let call = match operation {
                    "supply" => self.lending.supply(request),
                    "withdraw" => self.lending.withdraw(request),
                    "borrow" => self.lending.borrow(request),
                    _ => self.lending.repay(request),
                };
                call.await.map_err(|e| {
                    self.recovery.classify_client_error(
                        e,
                        ErrorContext::at(operation, self.clock.now())
                            .with_user(request.user_address.clone()),
                    )
                })
            })
            .await
    }

    /// Apply the overall operation deadline, a multiple of the per-call
    /// request timeout.
    async fn bounded<T>(
        &self,
        operation: &str,
        factor: u64,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = Duration::from_millis(self.config.protocols.request_timeout_ms * factor);
        match timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ClassifiedError::classify(
                ErrorKind::Timeout {
                    elapsed_ms: limit.as_millis() as u64,
                },
                ErrorContext::at(operation, self.clock.now()),
            )),
        }
    }

    fn decode<T: DeserializeOwned>(&self, operation: &str, request: Value) -> Result<T> {
        serde_json::from_value(request).map_err(|e| {
            ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: format!("malformed request: {e}"),
                },
                ErrorContext::at(operation, self.clock.now()),
            )
        })
    }

    fn encode<T: serde::Serialize>(&self, operation: &str, value: &T) -> Result<Value> {
        serde_json::to_value(value).map_err(|e| {
            ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: format!("response encoding: {e}"),
                },
                ErrorContext::at(operation, self.clock.now()),
            )
        })
    }
}
