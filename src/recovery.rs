//! Error classification and recovery engine
//!
//! Maps raw transport failures into the closed taxonomy (once, at this
//! boundary) and drives bounded retries with explicit delays. Retry state
//! is an explicit value threaded through the driver, not a shared side
//! table; the per-`(operation, user)` counters kept here are statistics
//! only. Fallback recovery is delegated to the caller through the
//! `fallback_options` carried by the classified error.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{
    ClassifiedError, ErrorContext, ErrorHistory, ErrorKind, RecoveryAction, Result,
};
use crate::protocols::ClientError;

/// Explicit retry bookkeeping for one logical operation.
///
/// Created fresh at the start of each logically new operation; never
/// shared across unrelated calls.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub operation: String,
    pub user_address: Option<String>,
    pub attempts: u32,
}

impl RetryState {
    pub fn new(operation: impl Into<String>, user_address: Option<String>) -> Self {
        Self {
            operation: operation.into(),
            user_address,
            attempts: 0,
        }
    }

    /// Key naming this operation in logs and terminal errors.
    pub fn key(&self) -> String {
        match &self.user_address {
            Some(user) => format!("{}:{}", self.operation, user),
            None => self.operation.clone(),
        }
    }
}

/// Classification plus bounded-retry driver
pub struct RecoveryEngine {
    retry: RetryConfig,
    history: Arc<ErrorHistory>,
    /// Attempts per operation key, for operator statistics.
    attempt_stats: DashMap<String, u32>,
}

impl RecoveryEngine {
    pub fn new(retry: RetryConfig, history: Arc<ErrorHistory>) -> Self {
        Self {
            retry,
            history,
            attempt_stats: DashMap::new(),
        }
    }

    /// Classify a raw client failure. The single place transport errors
    /// enter the taxonomy and the single place they are recorded into
    /// the history; an already classified error must never pass through
    /// here again.
    pub fn classify_client_error(&self, err: ClientError, context: ErrorContext) -> ClassifiedError {
        let kind = match err {
            ClientError::Http(e) => ErrorKind::NetworkError {
                detail: e.to_string(),
            },
            ClientError::Timeout { elapsed_ms } => ErrorKind::Timeout { elapsed_ms },
            ClientError::RateLimited { reset_at } => ErrorKind::RateLimitExceeded { reset_at },
            ClientError::Rejected { code, message } => ErrorKind::ValidationFailed {
                detail: format!("{code}: {message}"),
            },
            ClientError::InvalidResponse(detail) => ErrorKind::NetworkError { detail },
            ClientError::Unavailable(protocol) => ErrorKind::ProtocolUnavailable { protocol },
        };
        let classified = ClassifiedError::classify(kind, context);
        self.history.record(&classified);
        classified
    }

    /// Retry bound for a kind, config overrides taking precedence over
    /// the classification defaults.
    fn bounds_for(&self, error: &ClassifiedError) -> (u64, u32) {
        match &error.kind {
            ErrorKind::NetworkError { .. } | ErrorKind::Timeout { .. } => {
                (self.retry.network_delay_ms, self.retry.network_max_attempts)
            }
            ErrorKind::RateLimitExceeded { .. } => {
                let suggested = error.recovery.suggested_delay_ms.unwrap_or(0);
                (suggested.min(self.retry.rate_limit_max_delay_ms), 1)
            }
            ErrorKind::QuoteExpired { .. } => (
                self.retry.quote_expired_delay_ms,
                self.retry.quote_expired_max_attempts,
            ),
            ErrorKind::GasEstimationFailed { .. } => {
                (self.retry.gas_delay_ms, self.retry.gas_max_attempts)
            }
            _ => (
                error.recovery.suggested_delay_ms.unwrap_or(0),
                error.recovery.max_retries.unwrap_or(0),
            ),
        }
    }

    fn jittered(&self, delay_ms: u64) -> Duration {
        let jitter = if self.retry.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.retry.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(delay_ms + jitter)
    }

    /// Drive one logical operation through classification-aware retries.
    ///
    /// The closure performs the operation and returns either the result
    /// or an already classified error. Retryable kinds are re-invoked
    /// after their suggested delay until the per-kind attempt bound is
    /// exhausted, at which point the failure is converted into a terminal
    /// `ExecutionFailed` naming the exhausted operation key. All other
    /// kinds are returned to the caller unchanged.
    pub async fn run_with_recovery<T, F, Fut>(&self, mut state: RetryState, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // Logically new operation: counter starts at zero.
        self.attempt_stats.insert(state.key(), 0);

        loop {
            state.attempts += 1;
            self.attempt_stats.insert(state.key(), state.attempts);

            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(error);
            }

            let (delay_ms, max_attempts) = self.bounds_for(&error);

            // A zero budget disables the driver for this kind; the
            // original classification surfaces untouched.
            if max_attempts == 0 {
                return Err(error);
            }

            if state.attempts > max_attempts {
                warn!(
                    operation = %state.key(),
                    attempts = state.attempts,
                    "retry budget exhausted"
                );
                let terminal = ClassifiedError::classify(
                    ErrorKind::ExecutionFailed {
                        detail: format!(
                            "retries exhausted for {} after {} attempts: {}",
                            state.key(),
                            state.attempts,
                            error.technical_message
                        ),
                        tx_hash: None,
                    },
                    ErrorContext::at(state.operation.clone(), Utc::now())
                        .with_user(state.user_address.clone().unwrap_or_default()),
                );
                return Err(terminal);
            }

            debug!(
                operation = %state.key(),
                attempt = state.attempts,
                delay_ms,
                kind = %error.error_code,
                "retrying after recoverable failure"
            );
            sleep(self.jittered(delay_ms)).await;
        }
    }

    /// Single-shot recovery decision for callers that manage their own
    /// control flow: retryable errors report the delay to wait, fallback
    /// errors report the caller-side options, everything else is final.
    pub fn recovery_advice(&self, error: &ClassifiedError) -> RecoveryAdvice {
        match error.recovery.action {
            RecoveryAction::Retry => {
                let (delay_ms, max_attempts) = self.bounds_for(error);
                RecoveryAdvice::RetryAfter {
                    delay_ms,
                    max_attempts,
                }
            }
            RecoveryAction::Fallback => RecoveryAdvice::Fallback {
                options: error.recovery.fallback_options.clone(),
            },
            RecoveryAction::Manual | RecoveryAction::Abort => RecoveryAdvice::GiveUp,
        }
    }

    /// Attempts recorded for an operation key (statistics only).
    pub fn attempts_for(&self, key: &str) -> u32 {
        self.attempt_stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Advice for callers driving their own recovery
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAdvice {
    RetryAfter { delay_ms: u64, max_attempts: u32 },
    Fallback { options: Vec<String> },
    GiveUp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn engine() -> RecoveryEngine {
        let retry = RetryConfig {
            network_delay_ms: 1,
            quote_expired_delay_ms: 1,
            gas_delay_ms: 1,
            jitter_ms: 0,
            ..Default::default()
        };
        RecoveryEngine::new(retry, Arc::new(ErrorHistory::new(16)))
    }

    fn network_error(op: &str) -> ClassifiedError {
        ClassifiedError::classify(
            ErrorKind::NetworkError {
                detail: "connection refused".into(),
            },
            ErrorContext::new(op),
        )
    }

    #[tokio::test]
    async fn always_failing_retryable_op_terminates_after_bound() {
        let engine = engine();
        let calls = AtomicU32::new(0);

        let result: Result<()> = engine
            .run_with_recovery(RetryState::new("get_quote", Some("sei1user".into())), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(network_error("get_quote")) }
            })
            .await;

        // initial attempt + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let err = result.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ExecutionFailed { .. }));
        assert!(err.technical_message.contains("get_quote:sei1user"));
    }

    #[tokio::test]
    async fn success_after_transient_failure() {
        let engine = engine();
        let calls = AtomicU32::new(0);

        let result = engine
            .run_with_recovery(RetryState::new("get_routes", None), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(network_error("get_routes"))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(engine.attempts_for("get_routes"), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_passes_through_unchanged() {
        let engine = engine();
        let original = ClassifiedError::classify(
            ErrorKind::InvalidToken {
                token: "BOGUS".into(),
            },
            ErrorContext::new("execute_swap"),
        );
        let expected = original.clone();

        let result: Result<()> = engine
            .run_with_recovery(RetryState::new("execute_swap", None), || {
                let err = original.clone();
                async move { Err(err) }
            })
            .await;

        // same classification, not re-derived
        assert_eq!(result.unwrap_err(), expected);
    }

    #[tokio::test]
    async fn fallback_error_is_not_retried() {
        let engine = engine();
        let calls = AtomicU32::new(0);

        let result: Result<()> = engine
            .run_with_recovery(RetryState::new("execute_swap", None), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ClassifiedError::classify(
                        ErrorKind::InsufficientLiquidity,
                        ErrorContext::new("execute_swap"),
                    ))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = result.unwrap_err();
        assert_eq!(err.recovery.action, RecoveryAction::Fallback);
        assert_eq!(
            engine.recovery_advice(&err),
            RecoveryAdvice::Fallback {
                options: vec![
                    "reduce_amount".into(),
                    "widen_slippage".into(),
                    "alternate_route".into()
                ]
            }
        );
    }

    #[tokio::test]
    async fn surfaced_client_error_is_recorded_once() {
        let history = Arc::new(ErrorHistory::new(16));
        let engine = RecoveryEngine::new(
            RetryConfig {
                jitter_ms: 0,
                ..Default::default()
            },
            history.clone(),
        );

        let result: Result<()> = engine
            .run_with_recovery(
                RetryState::new("execute_swap", Some("sei1user".into())),
                || {
                    let error = engine.classify_client_error(
                        ClientError::Rejected {
                            code: "400".into(),
                            message: "nonce too low".into(),
                        },
                        ErrorContext::new("execute_swap").with_user("sei1user"),
                    );
                    async move { Err(error) }
                },
            )
            .await;

        assert!(result.is_err());
        // one root cause, one history entry
        assert_eq!(history.stats("sei1user").total, 1);
    }

    #[test]
    fn rate_limit_delay_clamped_to_config() {
        let engine = engine();
        let reset_at = Utc::now() + chrono::Duration::seconds(3_600);
        let err = ClassifiedError::classify(
            ErrorKind::RateLimitExceeded { reset_at },
            ErrorContext::new("get_quote"),
        );
        let (delay_ms, max_attempts) = engine.bounds_for(&err);
        assert!(delay_ms <= engine.retry.rate_limit_max_delay_ms);
        assert_eq!(max_attempts, 1);
    }

    #[test]
    fn classify_client_error_maps_transport_failures() {
        let engine = engine();
        let err = engine.classify_client_error(
            ClientError::Unavailable("router".into()),
            ErrorContext::new("get_quote"),
        );
        assert!(matches!(err.kind, ErrorKind::ProtocolUnavailable { .. }));
        assert_eq!(err.recovery.action, RecoveryAction::Fallback);
    }
}
