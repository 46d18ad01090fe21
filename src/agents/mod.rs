//! Decision agents
//!
//! An agent looks at a shared scenario snapshot and recommends one typed
//! action with a confidence score. Decisions are immutable once produced.
//! Actions are a closed set of per-domain variants rather than free-form
//! parameter maps, so the coordinator's conflict and ordering checks are
//! exhaustive.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ops::Holding;

/// Which domain an agent reasons about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Lending,
    Liquidity,
    Market,
}

/// Externally visible agent lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Processing,
    Completed,
    Failed,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LendingVerb {
    Supply,
    Withdraw,
    Borrow,
    Repay,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityVerb {
    AddLiquidity,
    RemoveLiquidity,
    Swap,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketVerb {
    Buy,
    Sell,
    Hold,
}

/// Whether an action grows or shrinks exposure to its asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increase,
    Decrease,
    Neutral,
}

/// One typed recommendation, tagged by domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "snake_case")]
pub enum DecisionAction {
    Lending {
        verb: LendingVerb,
        asset: String,
        amount: Decimal,
    },
    Liquidity {
        verb: LiquidityVerb,
        pool: String,
        asset: String,
        amount: Decimal,
    },
    Market {
        verb: MarketVerb,
        asset: String,
        amount: Decimal,
    },
}

impl DecisionAction {
    pub fn asset(&self) -> &str {
        match self {
            DecisionAction::Lending { asset, .. }
            | DecisionAction::Liquidity { asset, .. }
            | DecisionAction::Market { asset, .. } => asset,
        }
    }

    pub fn kind(&self) -> AgentKind {
        match self {
            DecisionAction::Lending { .. } => AgentKind::Lending,
            DecisionAction::Liquidity { .. } => AgentKind::Liquidity,
            DecisionAction::Market { .. } => AgentKind::Market,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            DecisionAction::Lending { verb, .. } => match verb {
                LendingVerb::Supply | LendingVerb::Borrow => Direction::Increase,
                LendingVerb::Withdraw | LendingVerb::Repay => Direction::Decrease,
                LendingVerb::Hold => Direction::Neutral,
            },
            DecisionAction::Liquidity { verb, .. } => match verb {
                LiquidityVerb::AddLiquidity => Direction::Increase,
                LiquidityVerb::RemoveLiquidity => Direction::Decrease,
                LiquidityVerb::Swap | LiquidityVerb::Hold => Direction::Neutral,
            },
            DecisionAction::Market { verb, .. } => match verb {
                MarketVerb::Buy => Direction::Increase,
                MarketVerb::Sell => Direction::Decrease,
                MarketVerb::Hold => Direction::Neutral,
            },
        }
    }

    pub fn is_hold(&self) -> bool {
        matches!(
            self,
            DecisionAction::Lending {
                verb: LendingVerb::Hold,
                ..
            } | DecisionAction::Liquidity {
                verb: LiquidityVerb::Hold,
                ..
            } | DecisionAction::Market {
                verb: MarketVerb::Hold,
                ..
            }
        )
    }

    /// Two actions conflict when they pull the same asset's exposure in
    /// opposite directions.
    pub fn opposes(&self, other: &DecisionAction) -> bool {
        if self.asset() != other.asset() {
            return false;
        }
        matches!(
            (self.direction(), other.direction()),
            (Direction::Increase, Direction::Decrease)
                | (Direction::Decrease, Direction::Increase)
        )
    }
}

/// A produced decision. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecision {
    pub agent_id: String,
    pub action: DecisionAction,
    /// In [0, 1]; out-of-range inputs are clamped at construction
    pub confidence: f64,
    pub reasoning: String,
}

impl AgentDecision {
    pub fn new(
        agent_id: impl Into<String>,
        action: DecisionAction,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            action,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
        }
    }
}

/// Caller-supplied snapshot, immutable for the duration of a round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationScenario {
    /// What the caller is trying to achieve, free text
    pub intent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_address: Option<String>,
    #[serde(default)]
    pub holdings: Vec<Holding>,
    /// Market snapshot the agents reason over
    #[serde(default)]
    pub market: serde_json::Value,
}

/// Failure surface of a single agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent failed: {0}")]
    Failed(String),

    #[error("agent unavailable")]
    Unavailable,
}

/// The agent contract. Internal reasoning is out of scope; only the
/// decision shape and the lifecycle status are.
#[async_trait]
pub trait DecisionAgent: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> AgentKind;

    fn status(&self) -> AgentStatus;

    /// Produce a decision for the scenario. `prior` carries decisions
    /// already made this round (sequential mode) or from the previous
    /// consensus round; it is empty otherwise.
    async fn make_decision(
        &self,
        scenario: &CoordinationScenario,
        prior: &[AgentDecision],
    ) -> Result<AgentDecision, AgentError>;
}
