//! Error taxonomy and classification
//!
//! Every raw failure observed from an external collaborator is classified
//! exactly once, at the boundary nearest its origin, into a
//! [`ClassifiedError`]: a closed error kind plus severity, recovery
//! strategy, a short user-facing message and a stable error code. The
//! closed sum type gives exhaustiveness checking at the recovery-strategy
//! dispatch site; recovery attempts reuse the original classification and
//! never re-derive it.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ClassifiedError>;

/// Closed taxonomy of failure kinds.
///
/// Display impls are the technical messages surfaced to operators; the
/// user-facing text lives in [`ClassifiedError::user_message`].
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("transport failure: {detail}")]
    NetworkError { detail: String },

    #[error("deadline exceeded after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("rate limited until {reset_at}")]
    RateLimitExceeded { reset_at: DateTime<Utc> },

    #[error("token not recognized: {token}")]
    InvalidToken { token: String },

    #[error("request validation failed: {detail}")]
    ValidationFailed { detail: String },

    #[error("insufficient liquidity for requested size")]
    InsufficientLiquidity,

    #[error("execution price moved beyond the slippage bound")]
    SlippageExceeded,

    #[error("no route found between the requested tokens")]
    RouteNotFound,

    #[error("quote expired at {valid_until}")]
    QuoteExpired { valid_until: DateTime<Utc> },

    #[error("gas estimation failed: {detail}")]
    GasEstimationFailed { detail: String },

    #[error("on-chain execution failed: {detail}")]
    ExecutionFailed {
        detail: String,
        /// Transaction hash of the failed step, when one was broadcast.
        tx_hash: Option<String>,
    },

    #[error("protocol unavailable: {protocol}")]
    ProtocolUnavailable { protocol: String },

    #[error("coordination did not complete within the timeout")]
    CoordinationTimeout,

    #[error("insufficient collateral for requested borrow")]
    InsufficientCollateral,

    #[error("health factor {health_factor} at or below liquidation bound")]
    HealthFactorTooLow { health_factor: f64 },
}

impl ErrorKind {
    /// Stable machine-readable code for operators and help references.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NetworkError { .. } => "E1001",
            ErrorKind::Timeout { .. } => "E1002",
            ErrorKind::RateLimitExceeded { .. } => "E1003",
            ErrorKind::InvalidToken { .. } => "E2001",
            ErrorKind::ValidationFailed { .. } => "E2002",
            ErrorKind::InsufficientLiquidity => "E3001",
            ErrorKind::SlippageExceeded => "E3002",
            ErrorKind::RouteNotFound => "E3003",
            ErrorKind::QuoteExpired { .. } => "E3004",
            ErrorKind::GasEstimationFailed { .. } => "E3005",
            ErrorKind::ExecutionFailed { .. } => "E4001",
            ErrorKind::ProtocolUnavailable { .. } => "E4002",
            ErrorKind::CoordinationTimeout => "E5001",
            ErrorKind::InsufficientCollateral => "E6001",
            ErrorKind::HealthFactorTooLow { .. } => "E6002",
        }
    }

    /// Short actionable message for end users, distinct from the
    /// technical Display text.
    pub fn user_message(&self) -> String {
        match self {
            ErrorKind::NetworkError { .. } => {
                "A network issue interrupted the request. It will be retried automatically.".into()
            }
            ErrorKind::Timeout { .. } => {
                "The operation took too long and was stopped. Please try again.".into()
            }
            ErrorKind::RateLimitExceeded { reset_at } => format!(
                "Too many requests. Please retry after {}.",
                reset_at.format("%H:%M:%S UTC")
            ),
            ErrorKind::InvalidToken { token } => {
                format!("The token '{token}' is not supported.")
            }
            ErrorKind::ValidationFailed { .. } => {
                "The request was rejected because some inputs are invalid.".into()
            }
            ErrorKind::InsufficientLiquidity => {
                "Not enough liquidity for this trade size. Try a smaller amount.".into()
            }
            ErrorKind::SlippageExceeded => {
                "The price moved too much. Widen your slippage tolerance or try again.".into()
            }
            ErrorKind::RouteNotFound => {
                "No trading route exists for this pair. Try different tokens.".into()
            }
            ErrorKind::QuoteExpired { .. } => {
                "The price quote expired. A fresh quote will be fetched.".into()
            }
            ErrorKind::GasEstimationFailed { .. } => {
                "Could not estimate transaction cost. It will be retried.".into()
            }
            ErrorKind::ExecutionFailed { .. } => {
                "The transaction failed on-chain. No further steps were attempted.".into()
            }
            ErrorKind::ProtocolUnavailable { protocol } => {
                format!("The {protocol} protocol is currently unavailable.")
            }
            ErrorKind::CoordinationTimeout => {
                "Agents did not reach a decision in time. A conservative fallback was used.".into()
            }
            ErrorKind::InsufficientCollateral => {
                "Collateral is insufficient for the requested borrow amount.".into()
            }
            ErrorKind::HealthFactorTooLow { .. } => {
                "This action would put the position too close to liquidation.".into()
            }
        }
    }
}

/// Failure severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// What the recovery engine (or the caller) should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryAction {
    /// Re-invoke the original operation after the suggested delay.
    Retry,
    /// Substitute a different execution path; concrete mechanics are the
    /// caller's job, named via `fallback_options`.
    Fallback,
    /// Needs a human decision.
    Manual,
    /// Surface immediately, nothing sensible to do.
    Abort,
}

/// Recovery strategy derived from the error kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    pub can_recover: bool,
    pub action: RecoveryAction,
    /// Delay before the next attempt, milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Caller-side fallback strategies, by name.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fallback_options: Vec<String>,
}

impl RecoveryStrategy {
    pub fn retry(delay_ms: u64, max_retries: u32) -> Self {
        Self {
            can_recover: true,
            action: RecoveryAction::Retry,
            suggested_delay_ms: Some(delay_ms),
            max_retries: Some(max_retries),
            fallback_options: Vec::new(),
        }
    }

    pub fn fallback(options: &[&str]) -> Self {
        Self {
            can_recover: true,
            action: RecoveryAction::Fallback,
            suggested_delay_ms: None,
            max_retries: None,
            fallback_options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn abort() -> Self {
        Self {
            can_recover: false,
            action: RecoveryAction::Abort,
            suggested_delay_ms: None,
            max_retries: None,
            fallback_options: Vec::new(),
        }
    }

    pub fn manual() -> Self {
        Self {
            can_recover: false,
            action: RecoveryAction::Manual,
            suggested_delay_ms: None,
            max_retries: None,
            fallback_options: Vec::new(),
        }
    }
}

/// Where and for whom the failure was observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Logical operation name, e.g. "get_quote" or "open_leverage".
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            timestamp: Utc::now(),
            user_address: None,
            metadata: None,
        }
    }

    pub fn at(operation: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            operation: operation.into(),
            timestamp,
            user_address: None,
            metadata: None,
        }
    }

    pub fn with_user(mut self, user_address: impl Into<String>) -> Self {
        self.user_address = Some(user_address.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Which steps of a composite operation committed before the failure.
///
/// Callers must be able to distinguish "nothing happened" from "some steps
/// committed, operation incomplete"; committed steps are never reversed
/// automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialExecution {
    pub steps_planned: usize,
    pub steps_committed: usize,
    /// Transaction references for the committed steps, in commit order.
    pub transactions: Vec<StepTransaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTransaction {
    pub step: String,
    pub tx_hash: String,
}

impl PartialExecution {
    pub fn none(steps_planned: usize) -> Self {
        Self {
            steps_planned,
            steps_committed: 0,
            transactions: Vec::new(),
        }
    }

    pub fn nothing_committed(&self) -> bool {
        self.steps_committed == 0
    }
}

/// A fully classified failure. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub context: ErrorContext,
    pub recovery: RecoveryStrategy,
    pub user_message: String,
    pub technical_message: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialExecution>,
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} (operation: {})",
            self.error_code, self.technical_message, self.context.operation
        )
    }
}

impl std::error::Error for ClassifiedError {}

impl ClassifiedError {
    /// Classify a raw failure kind. This is the single place the
    /// kind → severity/recovery table lives; the recovery engine may
    /// substitute configured retry delays but never re-classifies.
    pub fn classify(kind: ErrorKind, context: ErrorContext) -> Self {
        let (severity, recovery) = match &kind {
            ErrorKind::NetworkError { .. } | ErrorKind::Timeout { .. } => {
                (Severity::Medium, RecoveryStrategy::retry(2_000, 3))
            }
            ErrorKind::RateLimitExceeded { reset_at } => {
                let wait = (*reset_at - context.timestamp).num_milliseconds().max(0) as u64;
                (Severity::Low, RecoveryStrategy::retry(wait, 1))
            }
            ErrorKind::QuoteExpired { .. } => (Severity::Low, RecoveryStrategy::retry(1_000, 2)),
            ErrorKind::GasEstimationFailed { .. } => {
                (Severity::Medium, RecoveryStrategy::retry(1_000, 2))
            }
            ErrorKind::InsufficientLiquidity => (
                Severity::Medium,
                RecoveryStrategy::fallback(&["reduce_amount", "widen_slippage", "alternate_route"]),
            ),
            ErrorKind::SlippageExceeded => (
                Severity::Medium,
                RecoveryStrategy::fallback(&["widen_slippage", "alternate_route"]),
            ),
            ErrorKind::RouteNotFound => (
                Severity::Low,
                RecoveryStrategy::fallback(&["alternate_tokens", "multi_hop"]),
            ),
            ErrorKind::ProtocolUnavailable { .. } => (
                Severity::Critical,
                RecoveryStrategy::fallback(&["alternate_protocol"]),
            ),
            ErrorKind::InvalidToken { .. } | ErrorKind::ValidationFailed { .. } => {
                (Severity::High, RecoveryStrategy::abort())
            }
            ErrorKind::ExecutionFailed { .. } => (Severity::High, RecoveryStrategy::abort()),
            ErrorKind::CoordinationTimeout => (Severity::High, RecoveryStrategy::manual()),
            ErrorKind::InsufficientCollateral | ErrorKind::HealthFactorTooLow { .. } => {
                (Severity::High, RecoveryStrategy::abort())
            }
        };

        let user_message = kind.user_message();
        let technical_message = kind.to_string();
        let error_code = kind.code().to_string();

        Self {
            kind,
            severity,
            context,
            recovery,
            user_message,
            technical_message,
            error_code,
            partial: None,
        }
    }

    /// Attach partial-execution bookkeeping (composite operations only).
    pub fn with_partial(mut self, partial: PartialExecution) -> Self {
        self.partial = Some(partial);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.recovery.can_recover && self.recovery.action == RecoveryAction::Retry
    }
}

/// Compact record kept in the per-user history ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_code: String,
    pub severity: Severity,
    pub operation: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate view of a user's recent failures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserErrorStats {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Bounded per-user error history, statistics only.
pub struct ErrorHistory {
    max_per_user: usize,
    by_user: DashMap<String, VecDeque<ErrorRecord>>,
}

impl ErrorHistory {
    pub fn new(max_per_user: usize) -> Self {
        Self {
            max_per_user,
            by_user: DashMap::new(),
        }
    }

    pub fn record(&self, error: &ClassifiedError) {
        let Some(user) = error.context.user_address.clone() else {
            return;
        };
        let mut ring = self.by_user.entry(user).or_default();
        if ring.len() >= self.max_per_user {
            ring.pop_front();
        }
        ring.push_back(ErrorRecord {
            error_code: error.error_code.clone(),
            severity: error.severity,
            operation: error.context.operation.clone(),
            timestamp: error.context.timestamp,
        });
    }

    pub fn stats(&self, user_address: &str) -> UserErrorStats {
        let Some(ring) = self.by_user.get(user_address) else {
            return UserErrorStats::default();
        };
        let mut stats = UserErrorStats {
            total: ring.len(),
            ..Default::default()
        };
        for rec in ring.iter() {
            match rec.severity {
                Severity::Critical => stats.critical += 1,
                Severity::High => stats.high += 1,
                Severity::Medium => stats.medium += 1,
                Severity::Low => stats.low += 1,
            }
            stats.last_seen = Some(match stats.last_seen {
                Some(seen) if seen > rec.timestamp => seen,
                _ => rec.timestamp,
            });
        }
        stats
    }
}
