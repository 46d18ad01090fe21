//! Wire types shared with the external protocol clients

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tolerance used for approximate-equality invariants (0.1%)
pub const APPROX_TOLERANCE: f64 = 0.001;

/// Check two decimals agree within [`APPROX_TOLERANCE`].
pub fn approx_eq(a: Decimal, b: Decimal) -> bool {
    use rust_decimal::prelude::ToPrimitive;
    let a = a.to_f64().unwrap_or(0.0);
    let b = b.to_f64().unwrap_or(0.0);
    if a == b {
        return true;
    }
    let scale = a.abs().max(b.abs()).max(f64::MIN_POSITIVE);
    ((a - b).abs() / scale) <= APPROX_TOLERANCE
}

/// Quote/route request against the router protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    /// Tolerated output deviation, percent. Defaults from config when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slippage_pct: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_address: Option<String>,
    /// Constrain the quote to a single venue (used by arbitrage detection).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
}

impl QuoteRequest {
    pub fn new(
        token_in: impl Into<String>,
        token_out: impl Into<String>,
        amount_in: Decimal,
    ) -> Self {
        Self {
            token_in: token_in.into(),
            token_out: token_out.into(),
            amount_in,
            slippage_pct: None,
            user_address: None,
            venue: None,
        }
    }

    pub fn with_slippage(mut self, slippage_pct: Decimal) -> Self {
        self.slippage_pct = Some(slippage_pct);
        self
    }

    pub fn with_user(mut self, user_address: impl Into<String>) -> Self {
        self.user_address = Some(user_address.into());
        self
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }
}

/// Fee decomposition for a route. `total` must equal the sum of its parts
/// within [`APPROX_TOLERANCE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteFees {
    pub protocol: Decimal,
    pub gas: Decimal,
    pub liquidity_provider: Decimal,
    pub total: Decimal,
}

impl RouteFees {
    pub fn is_consistent(&self) -> bool {
        approx_eq(self.total, self.protocol + self.gas + self.liquidity_provider)
    }
}

/// One hop of a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    /// Venue executing this hop (e.g. a DEX name)
    pub venue: String,
    pub pool: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
}

/// A priced path from one asset to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub input_token: String,
    pub output_token: String,
    pub input_amount: Decimal,
    pub output_amount: Decimal,
    /// Fractional price movement caused by the trade, in [0, 1]
    pub price_impact: f64,
    pub execution_price: Decimal,
    pub minimum_amount_out: Decimal,
    pub steps: Vec<RouteStep>,
    pub gas_estimate: Decimal,
    pub fees: RouteFees,
    /// When the router issued this route
    pub issued_at: DateTime<Utc>,
    /// Hard expiry; a route is unusable at or after this instant
    pub valid_until: DateTime<Utc>,
}

impl Route {
    /// Net value delivered to the taker: output minus total fees.
    pub fn net_output(&self) -> Decimal {
        self.output_amount - self.fees.total
    }

    /// The hop amounts must decompose the input amount.
    pub fn steps_consistent(&self) -> bool {
        if self.steps.is_empty() {
            return true;
        }
        let first_hops: Decimal = self
            .steps
            .iter()
            .filter(|s| s.token_in == self.input_token)
            .map(|s| s.amount_in)
            .sum();
        approx_eq(first_hops, self.input_amount)
    }
}

/// Gas estimate for a prospective transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasEstimate {
    pub gas_limit: u64,
    pub gas_price: Decimal,
    pub total_cost: Decimal,
}

/// Result of a committed on-chain step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    pub tx_hash: String,
    pub gas_used: Decimal,
}

/// Swap execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub route: Route,
    pub user_address: String,
    /// Reject execution if delivered output would fall below this bound
    pub minimum_amount_out: Decimal,
}

/// Lending market action request (supply/withdraw/borrow/repay)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingRequest {
    pub asset: String,
    pub amount: Decimal,
    pub user_address: String,
}

/// An asset listed on the lending market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub decimals: u8,
    /// Current supply APY, fraction (0.05 = 5%)
    pub supply_apy: f64,
    /// Current borrow APY, fraction
    pub borrow_apy: f64,
    pub available_liquidity: Decimal,
    /// Venue risk score in [0, 1]; higher is riskier
    pub risk_score: f64,
}

/// One side of a lending position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub asset: String,
    pub amount: Decimal,
    pub apy: f64,
}

/// A user's lending position as reported by the lending protocol.
/// Health factor is authoritative here and is always re-read after any
/// state-changing step; it is never carried as a cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub user_address: String,
    pub supplied: Vec<PositionEntry>,
    pub borrowed: Vec<PositionEntry>,
    pub health_factor: f64,
}

impl Position {
    pub fn total_supplied(&self) -> Decimal {
        self.supplied.iter().map(|e| e.amount).sum()
    }

    pub fn total_borrowed(&self) -> Decimal {
        self.borrowed.iter().map(|e| e.amount).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fee_decomposition_tolerance() {
        let fees = RouteFees {
            protocol: dec!(3_000_000),
            gas: dec!(2_000_000),
            liquidity_provider: dec!(1_500_000),
            total: dec!(6_500_000),
        };
        assert!(fees.is_consistent());

        let skewed = RouteFees {
            total: dec!(6_600_000),
            ..fees
        };
        assert!(!skewed.is_consistent());
    }

    #[test]
    fn approx_eq_within_a_tenth_of_a_percent() {
        assert!(approx_eq(dec!(1000), dec!(1000.9)));
        assert!(!approx_eq(dec!(1000), dec!(1002)));
    }

    #[test]
    fn step_amounts_decompose_input() {
        let route = Route {
            id: "r1".into(),
            input_token: "SEI".into(),
            output_token: "USDC".into(),
            input_amount: dec!(100),
            output_amount: dec!(50),
            price_impact: 0.002,
            execution_price: dec!(0.5),
            minimum_amount_out: dec!(49),
            steps: vec![
                RouteStep {
                    venue: "dex-a".into(),
                    pool: "sei-usdc-a".into(),
                    token_in: "SEI".into(),
                    token_out: "USDC".into(),
                    amount_in: dec!(60),
                    amount_out: dec!(30),
                },
                RouteStep {
                    venue: "dex-b".into(),
                    pool: "sei-usdc-b".into(),
                    token_in: "SEI".into(),
                    token_out: "USDC".into(),
                    amount_in: dec!(40),
                    amount_out: dec!(20),
                },
            ],
            gas_estimate: dec!(0.01),
            fees: RouteFees {
                protocol: dec!(0.1),
                gas: dec!(0.01),
                liquidity_provider: dec!(0.05),
                total: dec!(0.16),
            },
            issued_at: Utc::now(),
            valid_until: Utc::now() + chrono::Duration::seconds(30),
        };
        assert!(route.steps_consistent());
        assert_eq!(route.net_output(), dec!(49.84));
    }
}
