//! External protocol collaborators
//!
//! The engine consumes the router protocol (swap aggregation) and the
//! lending protocol (collateralized market) through narrow async traits.
//! Concrete HTTP adapters live in [`router`] and [`lending`]; tests mock
//! the traits directly. Raw failures surface as [`ClientError`] and are
//! classified exactly once by the layer that observes them.

pub mod lending;
pub mod router;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use lending::HttpLendingClient;
pub use router::HttpRouterClient;
pub use types::{
    Asset, ExecuteRequest, GasEstimate, LendingRequest, Position, PositionEntry, QuoteRequest,
    Route, RouteFees, RouteStep, TxResult,
};

/// Raw transport-level failure from a protocol client.
///
/// Deliberately unclassified: severity, retry policy and user messaging
/// are assigned once, at the pipeline boundary.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("rate limited, resets at {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("protocol rejected request: {code} {message}")]
    Rejected { code: String, message: String },

    #[error("malformed response: {0}")]
    InvalidResponse(String),

    #[error("protocol unavailable: {0}")]
    Unavailable(String),
}

/// Swap-routing aggregator contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RouterProtocol: Send + Sync {
    /// Single best route for the request
    async fn quote(&self, request: &QuoteRequest) -> Result<Route, ClientError>;

    /// All candidate routes for the request
    async fn routes(&self, request: &QuoteRequest) -> Result<Vec<Route>, ClientError>;

    async fn estimate_gas(&self, request: &QuoteRequest) -> Result<GasEstimate, ClientError>;

    /// Execute a previously quoted route
    async fn execute(&self, request: &ExecuteRequest) -> Result<TxResult, ClientError>;
}

/// Collateralized lending market contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LendingProtocol: Send + Sync {
    async fn supported_assets(&self) -> Result<Vec<Asset>, ClientError>;

    async fn supply(&self, request: &LendingRequest) -> Result<TxResult, ClientError>;

    async fn withdraw(&self, request: &LendingRequest) -> Result<TxResult, ClientError>;

    async fn borrow(&self, request: &LendingRequest) -> Result<TxResult, ClientError>;

    async fn repay(&self, request: &LendingRequest) -> Result<TxResult, ClientError>;

    async fn user_position(&self, user_address: &str) -> Result<Position, ClientError>;

    /// Authoritative health factor; callers re-read this after every
    /// state-changing step rather than trusting a cached value.
    async fn health_factor(&self, user_address: &str) -> Result<f64, ClientError>;
}
