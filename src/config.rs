//! Configuration
//!
//! Loaded from a TOML file plus `BRAID_`-prefixed environment overrides.
//! Every field has a default so a bare `AppConfig::default()` is a valid
//! reference configuration (quote TTL < route TTL, retry bounds per error
//! kind, consensus thresholds).

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub protocols: ProtocolsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub slippage: SlippageConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub arbitrage: ArbitrageConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Endpoints for the external protocol clients
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolsConfig {
    /// Base URL of the swap-routing aggregator API
    #[serde(default = "default_router_url")]
    pub router_url: String,
    /// Base URL of the lending market API
    #[serde(default = "default_lending_url")]
    pub lending_url: String,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_router_url() -> String {
    "http://localhost:8545/router".to_string()
}

fn default_lending_url() -> String {
    "http://localhost:8545/lending".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ProtocolsConfig {
    fn default() -> Self {
        Self {
            router_url: default_router_url(),
            lending_url: default_lending_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Quote/route cache settings
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL for cached quotes, seconds. Quotes go stale faster than routes.
    #[serde(default = "default_quote_ttl")]
    pub quote_ttl_secs: u64,
    /// TTL for cached route sets, seconds
    #[serde(default = "default_route_ttl")]
    pub route_ttl_secs: u64,
    /// TTL for cached gas estimates, seconds
    #[serde(default = "default_gas_ttl")]
    pub gas_ttl_secs: u64,
    /// Write quotes through to the cache. Disabling skips only the write;
    /// fetch and validation still run.
    #[serde(default = "default_true")]
    pub enable_quote_cache: bool,
    /// Write route sets through to the cache
    #[serde(default = "default_true")]
    pub enable_route_cache: bool,
    /// Soft cap on total entries; the oldest entry is dropped at the cap
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_quote_ttl() -> u64 {
    30
}

fn default_route_ttl() -> u64 {
    60
}

fn default_gas_ttl() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> usize {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            quote_ttl_secs: default_quote_ttl(),
            route_ttl_secs: default_route_ttl(),
            gas_ttl_secs: default_gas_ttl(),
            enable_quote_cache: true,
            enable_route_cache: true,
            max_entries: default_max_entries(),
        }
    }
}

/// Slippage tolerance settings
#[derive(Debug, Clone, Deserialize)]
pub struct SlippageConfig {
    /// Default slippage tolerance, percent (e.g. 1.0 = 1%)
    #[serde(default = "default_slippage_pct")]
    pub default_slippage_pct: Decimal,
    /// Hard ceiling a request may ask for, percent
    #[serde(default = "default_max_slippage_pct")]
    pub max_slippage_pct: Decimal,
}

fn default_slippage_pct() -> Decimal {
    Decimal::ONE
}

fn default_max_slippage_pct() -> Decimal {
    Decimal::from(5)
}

impl Default for SlippageConfig {
    fn default() -> Self {
        Self {
            default_slippage_pct: default_slippage_pct(),
            max_slippage_pct: default_max_slippage_pct(),
        }
    }
}

/// Per-kind retry bounds for the recovery engine
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Delay before retrying network/timeout failures, milliseconds
    #[serde(default = "default_network_delay")]
    pub network_delay_ms: u64,
    /// Attempts for network/timeout failures
    #[serde(default = "default_network_attempts")]
    pub network_max_attempts: u32,
    /// Delay before re-fetching an expired quote, milliseconds
    #[serde(default = "default_quote_expired_delay")]
    pub quote_expired_delay_ms: u64,
    #[serde(default = "default_quote_expired_attempts")]
    pub quote_expired_max_attempts: u32,
    /// Delay before retrying a failed gas estimate, milliseconds
    #[serde(default = "default_gas_delay")]
    pub gas_delay_ms: u64,
    #[serde(default = "default_gas_attempts")]
    pub gas_max_attempts: u32,
    /// Clamp on server-supplied rate-limit reset waits, milliseconds
    #[serde(default = "default_rate_limit_max_delay")]
    pub rate_limit_max_delay_ms: u64,
    /// Random jitter added to every retry delay, up to this many ms
    #[serde(default = "default_jitter")]
    pub jitter_ms: u64,
}

fn default_network_delay() -> u64 {
    2_000
}

fn default_network_attempts() -> u32 {
    3
}

fn default_quote_expired_delay() -> u64 {
    1_000
}

fn default_quote_expired_attempts() -> u32 {
    2
}

fn default_gas_delay() -> u64 {
    1_000
}

fn default_gas_attempts() -> u32 {
    2
}

fn default_rate_limit_max_delay() -> u64 {
    60_000
}

fn default_jitter() -> u64 {
    250
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            network_delay_ms: default_network_delay(),
            network_max_attempts: default_network_attempts(),
            quote_expired_delay_ms: default_quote_expired_delay(),
            quote_expired_max_attempts: default_quote_expired_attempts(),
            gas_delay_ms: default_gas_delay(),
            gas_max_attempts: default_gas_attempts(),
            rate_limit_max_delay_ms: default_rate_limit_max_delay(),
            jitter_ms: default_jitter(),
        }
    }
}

/// Arbitrage detection thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct ArbitrageConfig {
    /// Minimum price discrepancy fraction to act on (0.01 = 1%)
    #[serde(default = "default_min_profit_threshold")]
    pub min_profit_threshold: f64,
    /// Estimated gas cost as a fraction of trade size
    #[serde(default = "default_gas_cost_fraction")]
    pub gas_cost_fraction: f64,
}

fn default_min_profit_threshold() -> f64 {
    0.01
}

fn default_gas_cost_fraction() -> f64 {
    0.001
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            min_profit_threshold: default_min_profit_threshold(),
            gas_cost_fraction: default_gas_cost_fraction(),
        }
    }
}

/// Multi-agent coordination settings
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinationConfig {
    /// Overall deadline for a coordination request, seconds
    #[serde(default = "default_coordination_timeout")]
    pub timeout_secs: u64,
    /// Per-agent decision deadline, seconds
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,
    /// Default coordination mode
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Maximum consensus rounds before resolving with the conflict policy
    #[serde(default = "default_max_rounds")]
    pub max_consensus_rounds: u32,
    /// A round reaches consensus when the variance of agent confidence
    /// scores falls below this threshold
    #[serde(default = "default_variance_threshold")]
    pub consensus_variance_threshold: f64,
}

fn default_coordination_timeout() -> u64 {
    30
}

fn default_agent_timeout() -> u64 {
    10
}

fn default_mode() -> String {
    "parallel".to_string()
}

fn default_max_rounds() -> u32 {
    3
}

fn default_variance_threshold() -> f64 {
    0.1
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_coordination_timeout(),
            agent_timeout_secs: default_agent_timeout(),
            mode: default_mode(),
            max_consensus_rounds: default_max_rounds(),
            consensus_variance_threshold: default_variance_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from a file path plus environment overrides.
    ///
    /// Environment variables use the `BRAID_` prefix with `__` as the
    /// section separator, e.g. `BRAID_CACHE__QUOTE_TTL_SECS=15`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let path = path.as_ref();
        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(Environment::with_prefix("BRAID").separator("__"))
            .build()?
            .try_deserialize()
    }
}
