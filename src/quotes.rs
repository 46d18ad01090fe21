//! Quote/validation pipeline
//!
//! Fetch-or-reuse quotes and route sets from the router protocol, validate
//! freshness and liquidity, compute slippage-adjusted bounds, and rank
//! candidate routes. Client failures are classified here — the boundary
//! nearest their origin — and locally recoverable kinds are retried
//! transparently through the recovery engine before surfacing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{CacheKind, CachedValue, Fingerprint, QuoteCache};
use crate::config::{CacheConfig, SlippageConfig};
use crate::error::{ClassifiedError, ErrorContext, ErrorKind, Result};
use crate::protocols::types::{GasEstimate, QuoteRequest, Route};
use crate::protocols::RouterProtocol;
use crate::recovery::{RecoveryEngine, RetryState};
use crate::time::SharedClock;

/// A validated, slippage-adjusted quote. Immutable once issued; expiry is
/// a read-time check against `valid_until`, never a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub route: Route,
    pub issued_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub slippage_adjusted_amount_out: Decimal,
}

impl Quote {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until <= now
    }
}

/// A ranked set of candidate routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSet {
    /// Best route first; ranked by net output, ties by lower price
    /// impact, then fewer hops.
    pub best_route: Route,
    pub routes: Vec<Route>,
}

/// Quote/route fetch, validation and ranking
pub struct QuotePipeline {
    router: Arc<dyn RouterProtocol>,
    cache: Arc<QuoteCache>,
    recovery: Arc<RecoveryEngine>,
    cache_cfg: CacheConfig,
    slippage_cfg: SlippageConfig,
    clock: SharedClock,
}

impl QuotePipeline {
    pub fn new(
        router: Arc<dyn RouterProtocol>,
        cache: Arc<QuoteCache>,
        recovery: Arc<RecoveryEngine>,
        cache_cfg: CacheConfig,
        slippage_cfg: SlippageConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            router,
            cache,
            recovery,
            cache_cfg,
            slippage_cfg,
            clock,
        }
    }

    fn context(&self, operation: &str, request: &QuoteRequest) -> ErrorContext {
        let ctx = ErrorContext::at(operation, self.clock.now());
        match &request.user_address {
            Some(user) => ctx.with_user(user.clone()),
            None => ctx,
        }
    }

    fn validate_request(&self, operation: &str, request: &QuoteRequest) -> Result<Decimal> {
        if request.token_in.trim().is_empty() {
            return Err(ClassifiedError::classify(
                ErrorKind::InvalidToken {
                    token: request.token_in.clone(),
                },
                self.context(operation, request),
            ));
        }
        if request.token_out.trim().is_empty() {
            return Err(ClassifiedError::classify(
                ErrorKind::InvalidToken {
                    token: request.token_out.clone(),
                },
                self.context(operation, request),
            ));
        }
        if request.amount_in <= Decimal::ZERO {
            return Err(ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: "amount_in must be positive".into(),
                },
                self.context(operation, request),
            ));
        }

        let slippage = request
            .slippage_pct
            .unwrap_or(self.slippage_cfg.default_slippage_pct);
        if slippage < Decimal::ZERO || slippage > self.slippage_cfg.max_slippage_pct {
            return Err(ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: format!(
                        "slippage {slippage}% outside [0, {}]",
                        self.slippage_cfg.max_slippage_pct
                    ),
                },
                self.context(operation, request),
            ));
        }
        Ok(slippage)
    }

    /// Freshness and liquidity checks shared by every route that enters
    /// the pipeline, cached or fetched.
    fn validate_route(&self, operation: &str, request: &QuoteRequest, route: &Route) -> Result<()> {
        let now = self.clock.now();
        if route.valid_until <= now {
            return Err(ClassifiedError::classify(
                ErrorKind::QuoteExpired {
                    valid_until: route.valid_until,
                },
                self.context(operation, request),
            ));
        }
        if route.output_amount <= Decimal::ZERO {
            return Err(ClassifiedError::classify(
                ErrorKind::InsufficientLiquidity,
                self.context(operation, request),
            ));
        }
        if !route.fees.is_consistent() {
            return Err(ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: format!("route {} fee decomposition inconsistent", route.id),
                },
                self.context(operation, request),
            ));
        }
        Ok(())
    }

    fn slippage_adjust(amount_out: Decimal, slippage_pct: Decimal) -> Decimal {
        amount_out * (Decimal::ONE - slippage_pct / Decimal::ONE_HUNDRED)
    }

    /// Fetch-or-reuse a validated quote.
    ///
    /// Cache hits are still subject to the freshness check: a cached route
    /// whose `valid_until` has passed is rejected with `quote_expired`
    /// (and bypassed on the retrying re-fetch), never silently returned.
    pub async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote> {
        let slippage = self.validate_request("get_quote", request)?;
        let fingerprint = Fingerprint::quote(request);

        // Once an expired cache entry is seen, retries go straight to the
        // router instead of re-reading the same stale value.
        let bypass_cache = Arc::new(AtomicBool::new(false));

        let state = RetryState::new("get_quote", request.user_address.clone());
        let route = self
            .recovery
            .run_with_recovery(state, || {
                let bypass_cache = bypass_cache.clone();
                let fingerprint = &fingerprint;
                async move {
                    if !bypass_cache.load(Ordering::Relaxed) {
                        if let Some(CachedValue::Quote(route)) =
                            self.cache.get(CacheKind::Quote, fingerprint)
                        {
                            debug!(route_id = %route.id, "quote cache hit");
                            return match self.validate_route("get_quote", request, &route) {
                                Ok(()) => Ok(route),
                                Err(err) => {
                                    bypass_cache.store(true, Ordering::Relaxed);
                                    Err(err)
                                }
                            };
                        }
                    }

                    let route = self.router.quote(request).await.map_err(|e| {
                        self.recovery
                            .classify_client_error(e, self.context("get_quote", request))
                    })?;
                    self.validate_route("get_quote", request, &route)?;

                    if self.cache_cfg.enable_quote_cache {
                        self.cache.put(
                            CacheKind::Quote,
                            fingerprint.clone(),
                            CachedValue::Quote(route.clone()),
                        );
                    }
                    Ok(route)
                }
            })
            .await?;

        info!(
            route_id = %route.id,
            output = %route.output_amount,
            "quote validated"
        );

        Ok(Quote {
            issued_at: route.issued_at,
            valid_until: route.valid_until,
            slippage_adjusted_amount_out: Self::slippage_adjust(route.output_amount, slippage),
            route,
        })
    }

    /// Fetch-or-reuse candidate routes and rank them.
    pub async fn get_routes(&self, request: &QuoteRequest) -> Result<RouteSet> {
        self.validate_request("get_routes", request)?;
        let fingerprint = Fingerprint::routes(request);

        let state = RetryState::new("get_routes", request.user_address.clone());
        let routes = self
            .recovery
            .run_with_recovery(state, || async {
                if let Some(CachedValue::Routes(routes)) =
                    self.cache.get(CacheKind::Route, &fingerprint)
                {
                    debug!(count = routes.len(), "route cache hit");
                    return Ok(routes);
                }

                let routes = self.router.routes(request).await.map_err(|e| {
                    self.recovery
                        .classify_client_error(e, self.context("get_routes", request))
                })?;

                if self.cache_cfg.enable_route_cache {
                    self.cache.put(
                        CacheKind::Route,
                        fingerprint.clone(),
                        CachedValue::Routes(routes.clone()),
                    );
                }
                Ok(routes)
            })
            .await?;

        let now = self.clock.now();
        let mut usable: Vec<Route> = routes
            .into_iter()
            .filter(|r| r.valid_until > now && r.output_amount > Decimal::ZERO)
            .collect();

        if usable.is_empty() {
            return Err(ClassifiedError::classify(
                ErrorKind::RouteNotFound,
                self.context("get_routes", request),
            ));
        }

        usable.sort_by(|a, b| {
            b.net_output()
                .cmp(&a.net_output())
                .then_with(|| {
                    a.price_impact
                        .partial_cmp(&b.price_impact)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.steps.len().cmp(&b.steps.len()))
        });

        let best_route = usable[0].clone();
        Ok(RouteSet {
            best_route,
            routes: usable,
        })
    }

    /// Gas estimate with classification and short-lived caching.
    pub async fn estimate_gas(&self, request: &QuoteRequest) -> Result<GasEstimate> {
        self.validate_request("estimate_gas", request)?;
        let fingerprint = Fingerprint::gas(request);

        let state = RetryState::new("estimate_gas", request.user_address.clone());
        self.recovery
            .run_with_recovery(state, || async {
                if let Some(CachedValue::Gas(estimate)) =
                    self.cache.get(CacheKind::Gas, &fingerprint)
                {
                    return Ok(estimate);
                }

                let estimate = self.router.estimate_gas(request).await.map_err(|e| {
                    // Gas estimation has its own retry budget.
                    let classified = self
                        .recovery
                        .classify_client_error(e, self.context("estimate_gas", request));
                    match classified.kind {
                        ErrorKind::NetworkError { detail } => ClassifiedError::classify(
                            ErrorKind::GasEstimationFailed { detail },
                            classified.context,
                        ),
                        _ => classified,
                    }
                })?;

                self.cache.put(
                    CacheKind::Gas,
                    fingerprint.clone(),
                    CachedValue::Gas(estimate.clone()),
                );
                Ok(estimate)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::ErrorHistory;
    use crate::protocols::types::RouteFees;
    use crate::protocols::{ClientError, MockRouterProtocol};
    use crate::time::{Clock, ManualClock};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn route_valid_until(now: DateTime<Utc>, secs: i64) -> Route {
        Route {
            id: "r1".into(),
            input_token: "SEI".into(),
            output_token: "USDC".into(),
            input_amount: dec!(1000000000000000000),
            output_amount: dec!(1500000000),
            price_impact: 0.002,
            execution_price: dec!(0.0000000015),
            minimum_amount_out: dec!(1485000000),
            steps: vec![],
            gas_estimate: dec!(0.01),
            fees: RouteFees {
                protocol: dec!(3000000),
                gas: dec!(2000000),
                liquidity_provider: dec!(1500000),
                total: dec!(6500000),
            },
            issued_at: now,
            valid_until: now + Duration::seconds(secs),
        }
    }

    fn pipeline_with(router: MockRouterProtocol, clock: ManualClock) -> QuotePipeline {
        let clock: SharedClock = Arc::new(clock);
        let recovery = Arc::new(RecoveryEngine::new(
            RetryConfig {
                network_delay_ms: 1,
                quote_expired_delay_ms: 1,
                gas_delay_ms: 1,
                jitter_ms: 0,
                ..Default::default()
            },
            Arc::new(ErrorHistory::new(16)),
        ));
        QuotePipeline::new(
            Arc::new(router),
            Arc::new(QuoteCache::new(CacheConfig::default(), clock.clone())),
            recovery,
            CacheConfig::default(),
            SlippageConfig::default(),
            clock,
        )
    }

    #[tokio::test]
    async fn quote_with_one_percent_slippage_bound() {
        let clock = ManualClock::new(Utc::now());
        let now = clock.now();
        let mut router = MockRouterProtocol::new();
        router
            .expect_quote()
            .times(1)
            .returning(move |_| Ok(route_valid_until(now, 30)));

        let pipeline = pipeline_with(router, clock);
        let request =
            QuoteRequest::new("SEI", "USDC", dec!(1000000000000000000)).with_slippage(dec!(1));

        let quote = pipeline.get_quote(&request).await.unwrap();
        // 1.5e9 minus 1% slippage
        assert_eq!(quote.slippage_adjusted_amount_out, dec!(1485000000));
    }

    #[tokio::test]
    async fn expired_fetch_is_rejected_with_quote_expired() {
        let clock = ManualClock::new(Utc::now());
        let now = clock.now();
        let mut router = MockRouterProtocol::new();
        // always returns a route that expired one second ago
        router
            .expect_quote()
            .returning(move |_| Ok(route_valid_until(now, -1)));

        let pipeline = pipeline_with(router, clock);
        let request = QuoteRequest::new("SEI", "USDC", dec!(100));

        let err = pipeline.get_quote(&request).await.unwrap_err();
        // retried to its bound, then surfaced as terminal execution failure
        // naming the exhausted operation
        assert!(matches!(err.kind, ErrorKind::ExecutionFailed { .. }));
        assert!(err.technical_message.contains("quote expired"));
    }

    #[tokio::test]
    async fn cached_quote_survives_within_ttl_without_refetch() {
        let clock = ManualClock::new(Utc::now());
        let now = clock.now();
        let mut router = MockRouterProtocol::new();
        router
            .expect_quote()
            .times(1)
            .returning(move |_| Ok(route_valid_until(now, 300)));

        let pipeline = pipeline_with(router, clock.clone());
        let request = QuoteRequest::new("SEI", "USDC", dec!(100));

        let first = pipeline.get_quote(&request).await.unwrap();
        clock.advance(Duration::seconds(10));
        let second = pipeline.get_quote(&request).await.unwrap();
        assert_eq!(first.route.id, second.route.id);
    }

    #[tokio::test]
    async fn stale_cache_entry_triggers_refetch() {
        let clock = ManualClock::new(Utc::now());
        let now = clock.now();
        let mut router = MockRouterProtocol::new();
        router
            .expect_quote()
            .times(2)
            .returning(move |_| Ok(route_valid_until(now, 600)));

        let pipeline = pipeline_with(router, clock.clone());
        let request = QuoteRequest::new("SEI", "USDC", dec!(100));

        pipeline.get_quote(&request).await.unwrap();
        // past the quote TTL of 30s
        clock.advance(Duration::seconds(31));
        pipeline.get_quote(&request).await.unwrap();
    }

    #[tokio::test]
    async fn zero_output_is_insufficient_liquidity() {
        let clock = ManualClock::new(Utc::now());
        let now = clock.now();
        let mut router = MockRouterProtocol::new();
        router.expect_quote().times(1).returning(move |_| {
            let mut route = route_valid_until(now, 30);
            route.output_amount = Decimal::ZERO;
            Ok(route)
        });

        let pipeline = pipeline_with(router, clock);
        let request = QuoteRequest::new("SEI", "USDC", dec!(100));

        let err = pipeline.get_quote(&request).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InsufficientLiquidity);
    }

    #[tokio::test]
    async fn best_route_dominates_on_net_output() {
        let clock = ManualClock::new(Utc::now());
        let now = clock.now();
        let mut router = MockRouterProtocol::new();
        router.expect_routes().times(1).returning(move |_| {
            let mut cheap = route_valid_until(now, 30);
            cheap.id = "cheap".into();
            cheap.output_amount = dec!(1400000000);

            let mut rich = route_valid_until(now, 30);
            rich.id = "rich".into();
            rich.output_amount = dec!(1500000000);

            Ok(vec![cheap, rich])
        });

        let pipeline = pipeline_with(router, clock);
        let request = QuoteRequest::new("SEI", "USDC", dec!(100));

        let set = pipeline.get_routes(&request).await.unwrap();
        assert_eq!(set.best_route.id, "rich");
        for route in &set.routes {
            assert!(set.best_route.net_output() >= route.net_output());
        }
    }

    #[tokio::test]
    async fn route_ranking_breaks_ties_by_price_impact_then_hops() {
        let clock = ManualClock::new(Utc::now());
        let now = clock.now();
        let mut router = MockRouterProtocol::new();
        router.expect_routes().times(1).returning(move |_| {
            let mut a = route_valid_until(now, 30);
            a.id = "impactful".into();
            a.price_impact = 0.01;

            let mut b = route_valid_until(now, 30);
            b.id = "gentle".into();
            b.price_impact = 0.001;

            Ok(vec![a, b])
        });

        let pipeline = pipeline_with(router, clock);
        let set = pipeline
            .get_routes(&QuoteRequest::new("SEI", "USDC", dec!(100)))
            .await
            .unwrap();
        assert_eq!(set.best_route.id, "gentle");
    }

    #[tokio::test]
    async fn empty_route_set_is_route_not_found() {
        let clock = ManualClock::new(Utc::now());
        let mut router = MockRouterProtocol::new();
        router.expect_routes().times(1).returning(|_| Ok(vec![]));

        let pipeline = pipeline_with(router, clock);
        let err = pipeline
            .get_routes(&QuoteRequest::new("SEI", "USDC", dec!(100)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RouteNotFound);
    }

    #[tokio::test]
    async fn invalid_request_rejected_before_any_fetch() {
        let clock = ManualClock::new(Utc::now());
        let router = MockRouterProtocol::new(); // no expectations: must not be called

        let pipeline = pipeline_with(router, clock);
        let err = pipeline
            .get_quote(&QuoteRequest::new("SEI", "USDC", dec!(0)))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn unavailable_protocol_surfaces_fallback_without_retry() {
        let clock = ManualClock::new(Utc::now());
        let mut router = MockRouterProtocol::new();
        // ProtocolUnavailable is a fallback kind: exactly one call,
        // surfaced immediately for the caller to reroute
        router
            .expect_quote()
            .times(1)
            .returning(|_| Err(ClientError::Unavailable("router".into())));

        let pipeline = pipeline_with(router, clock);
        let err = pipeline
            .get_quote(&QuoteRequest::new("SEI", "USDC", dec!(100)))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ProtocolUnavailable { .. }));
    }

    #[tokio::test]
    async fn transient_network_failure_is_retried_to_success() {
        let clock = ManualClock::new(Utc::now());
        let now = clock.now();
        let mut router = MockRouterProtocol::new();
        let mut call = 0u32;
        router.expect_quote().times(2).returning(move |_| {
            call += 1;
            if call == 1 {
                Err(ClientError::InvalidResponse("truncated body".into()))
            } else {
                Ok(route_valid_until(now, 30))
            }
        });

        let pipeline = pipeline_with(router, clock);
        let quote = pipeline
            .get_quote(&QuoteRequest::new("SEI", "USDC", dec!(100)))
            .await
            .unwrap();
        assert_eq!(quote.route.id, "r1");
    }
}
