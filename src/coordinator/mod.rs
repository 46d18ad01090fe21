//! Multi-agent coordination
//!
//! Collects decisions from registered agents for one scenario snapshot,
//! detects conflicting recommendations, and resolves them into a single
//! executable strategy. Sequential and parallel modes make one pass;
//! consensus mode re-runs rounds until agent confidence converges or the
//! round budget is spent. Adaptive and fault-tolerant modes degrade to
//! the available subset of required agents instead of failing outright.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::agents::{
    AgentDecision, AgentKind, AgentStatus, CoordinationScenario, DecisionAction, DecisionAgent,
    MarketVerb,
};
use crate::config::CoordinationConfig;
use crate::error::{ClassifiedError, ErrorContext, ErrorKind, Result};
use crate::time::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationMode {
    Sequential,
    Parallel,
    Consensus,
    Adaptive,
    FaultTolerant,
}

impl CoordinationMode {
    fn degrades_gracefully(self) -> bool {
        matches!(
            self,
            CoordinationMode::Adaptive | CoordinationMode::FaultTolerant
        )
    }
}

impl FromStr for CoordinationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(CoordinationMode::Sequential),
            "parallel" => Ok(CoordinationMode::Parallel),
            "consensus" => Ok(CoordinationMode::Consensus),
            "adaptive" => Ok(CoordinationMode::Adaptive),
            "fault_tolerant" => Ok(CoordinationMode::FaultTolerant),
            other => Err(format!("unknown coordination mode: {other}")),
        }
    }
}

/// How conflicting decisions are collapsed into one primary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Weight confidence by how many agents agree on the same move
    #[default]
    Consensus,
    /// Weight confidence by how much risk the action takes on
    RiskWeighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationRequest {
    pub scenario: CoordinationScenario,
    pub required_agents: Vec<String>,
    #[serde(default)]
    pub optional_agents: Vec<String>,
    pub mode: CoordinationMode,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

/// One step of the resolved execution plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub agent_id: String,
    pub action: DecisionAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationStrategy {
    pub primary: AgentDecision,
    pub supporting: Vec<AgentDecision>,
    /// Ordered so lending steps run before liquidity steps that depend
    /// on their output, market steps last. Holds are not planned.
    pub execution_plan: Vec<PlanStep>,
    pub mode: CoordinationMode,
    pub rounds: u32,
    pub consensus_reached: bool,
    pub participating_agents: Vec<String>,
    pub unavailable_agents: Vec<String>,
    pub failed_agents: Vec<String>,
    pub conflicts_detected: usize,
    pub adapted_for_missing_agents: bool,
    pub adapted_for_failures: bool,
}

pub struct Coordinator {
    agents: Vec<Arc<dyn DecisionAgent>>,
    config: CoordinationConfig,
    clock: SharedClock,
}

impl Coordinator {
    pub fn new(config: CoordinationConfig, clock: SharedClock) -> Self {
        Self {
            agents: Vec::new(),
            config,
            clock,
        }
    }

    pub fn with_agent(mut self, agent: Arc<dyn DecisionAgent>) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn register(&mut self, agent: Arc<dyn DecisionAgent>) {
        self.agents.push(agent);
    }

    fn lookup(&self, id: &str) -> Option<&Arc<dyn DecisionAgent>> {
        self.agents.iter().find(|a| a.id() == id)
    }

    fn context(&self, scenario: &CoordinationScenario) -> ErrorContext {
        let ctx = ErrorContext::at("coordinate_agents", self.clock.now());
        match &scenario.user_address {
            Some(user) => ctx.with_user(user.clone()),
            None => ctx,
        }
    }

    /// Run one coordination request end to end.
    pub async fn coordinate(&self, request: &CoordinationRequest) -> Result<CoordinationStrategy> {
        if request.required_agents.is_empty() {
            return Err(ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: "at least one required agent must be named".into(),
                },
                self.context(&request.scenario),
            ));
        }

        // Partition the requested agents into a working roster and the
        // unavailable remainder.
        let mut roster: Vec<Arc<dyn DecisionAgent>> = Vec::new();
        let mut unavailable: Vec<String> = Vec::new();
        let mut required_available = 0usize;

        for id in &request.required_agents {
            match self.lookup(id) {
                Some(agent) if agent.status() != AgentStatus::Unavailable => {
                    roster.push(agent.clone());
                    required_available += 1;
                }
                _ => unavailable.push(id.clone()),
            }
        }
        for id in &request.optional_agents {
            if let Some(agent) = self.lookup(id) {
                if agent.status() != AgentStatus::Unavailable {
                    roster.push(agent.clone());
                }
            }
        }

        if !unavailable.is_empty() && !request.mode.degrades_gracefully() {
            return Err(ClassifiedError::classify(
                ErrorKind::ValidationFailed {
                    detail: format!(
                        "required agents unavailable in {:?} mode: {}",
                        request.mode,
                        unavailable.join(", ")
                    ),
                },
                self.context(&request.scenario),
            ));
        }
        if required_available == 0 {
            // Nothing can decide; surface the conservative fallback.
            return Err(self.timeout_error(request, Vec::new()));
        }

        let adapted_for_missing_agents =
            request.mode.degrades_gracefully() && !unavailable.is_empty();

        let collected: Mutex<Vec<AgentDecision>> = Mutex::new(Vec::new());
        let failed: Mutex<Vec<String>> = Mutex::new(Vec::new());

        let deadline = Duration::from_secs(self.config.timeout_secs);
        let outcome = timeout(
            deadline,
            self.run_rounds(request.mode, &request.scenario, &roster, &collected, &failed),
        )
        .await;

        let decisions = collected.into_inner().unwrap_or_default();
        let failed = failed.into_inner().unwrap_or_default();

        let (rounds, consensus_reached) = match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(elapsed_secs = self.config.timeout_secs, "coordination timed out");
                return Err(self.timeout_error(request, decisions));
            }
        };

        if decisions.is_empty() {
            return Err(self.timeout_error(request, decisions));
        }

        let adapted_for_failures = request.mode.degrades_gracefully() && !failed.is_empty();
        let conflicts_detected = count_conflicts(&decisions);
        let (primary, supporting) = resolve(request.conflict_policy, &decisions);
        let execution_plan = build_plan(&decisions);
        let participating_agents: Vec<String> =
            decisions.iter().map(|d| d.agent_id.clone()).collect();

        info!(
            mode = ?request.mode,
            participating = participating_agents.len(),
            conflicts = conflicts_detected,
            rounds,
            consensus_reached,
            "coordination resolved"
        );

        Ok(CoordinationStrategy {
            primary,
            supporting,
            execution_plan,
            mode: request.mode,
            rounds,
            consensus_reached,
            participating_agents,
            unavailable_agents: unavailable,
            failed_agents: failed,
            conflicts_detected,
            adapted_for_missing_agents,
            adapted_for_failures,
        })
    }

    async fn run_rounds(
        &self,
        mode: CoordinationMode,
        scenario: &CoordinationScenario,
        roster: &[Arc<dyn DecisionAgent>],
        collected: &Mutex<Vec<AgentDecision>>,
        failed: &Mutex<Vec<String>>,
    ) -> (u32, bool) {
        match mode {
            CoordinationMode::Sequential => {
                for agent in roster {
                    let prior = collected.lock().map(|g| g.clone()).unwrap_or_default();
                    if let Some(decision) = self.decide_one(agent, scenario, &prior, failed).await
                    {
                        if let Ok(mut guard) = collected.lock() {
                            guard.push(decision);
                        }
                    }
                }
                (1, false)
            }
            CoordinationMode::Parallel
            | CoordinationMode::Adaptive
            | CoordinationMode::FaultTolerant => {
                let decisions = self.decide_all(roster, scenario, &[], failed).await;
                if let Ok(mut guard) = collected.lock() {
                    *guard = decisions;
                }
                (1, false)
            }
            CoordinationMode::Consensus => {
                let mut prior: Vec<AgentDecision> = Vec::new();
                for round in 1..=self.config.max_consensus_rounds {
                    let decisions = self.decide_all(roster, scenario, &prior, failed).await;
                    let converged = !decisions.is_empty()
                        && confidence_variance(&decisions)
                            < self.config.consensus_variance_threshold;
                    prior = decisions.clone();
                    if let Ok(mut guard) = collected.lock() {
                        *guard = decisions;
                    }
                    debug!(round, converged, "consensus round complete");
                    if converged {
                        return (round, true);
                    }
                }
                (self.config.max_consensus_rounds, false)
            }
        }
    }

    async fn decide_all(
        &self,
        roster: &[Arc<dyn DecisionAgent>],
        scenario: &CoordinationScenario,
        prior: &[AgentDecision],
        failed: &Mutex<Vec<String>>,
    ) -> Vec<AgentDecision> {
        let futures = roster
            .iter()
            .map(|agent| self.decide_one(agent, scenario, prior, failed));
        join_all(futures).await.into_iter().flatten().collect()
    }

    /// One agent's decision with the per-agent deadline applied. A
    /// decision from an agent that reports `Failed` afterwards is
    /// dropped for the round.
    async fn decide_one(
        &self,
        agent: &Arc<dyn DecisionAgent>,
        scenario: &CoordinationScenario,
        prior: &[AgentDecision],
        failed: &Mutex<Vec<String>>,
    ) -> Option<AgentDecision> {
        let per_agent = Duration::from_secs(self.config.agent_timeout_secs);
        let result = timeout(per_agent, agent.make_decision(scenario, prior)).await;

        let mark_failed = || {
            if let Ok(mut guard) = failed.lock() {
                guard.push(agent.id().to_string());
            }
        };

        match result {
            Ok(Ok(decision)) => {
                if agent.status() == AgentStatus::Failed {
                    warn!(agent = agent.id(), "agent failed mid-round, decision dropped");
                    mark_failed();
                    None
                } else {
                    Some(decision)
                }
            }
            Ok(Err(err)) => {
                warn!(agent = agent.id(), %err, "agent errored");
                mark_failed();
                None
            }
            Err(_) => {
                warn!(agent = agent.id(), "agent timed out");
                mark_failed();
                None
            }
        }
    }

    fn timeout_error(
        &self,
        request: &CoordinationRequest,
        partial: Vec<AgentDecision>,
    ) -> ClassifiedError {
        let fallback = conservative_fallback(&request.scenario, request.mode);
        let metadata = json!({
            "partial_decisions": partial,
            "fallback_strategy": fallback,
        });
        ClassifiedError::classify(
            ErrorKind::CoordinationTimeout,
            self.context(&request.scenario).with_metadata(metadata),
        )
    }
}

/// Hold everything: the strategy of record when coordination times out.
fn conservative_fallback(
    scenario: &CoordinationScenario,
    mode: CoordinationMode,
) -> CoordinationStrategy {
    let asset = scenario
        .holdings
        .first()
        .map(|h| h.asset.clone())
        .unwrap_or_else(|| "portfolio".to_string());
    let primary = AgentDecision::new(
        "coordinator",
        DecisionAction::Market {
            verb: MarketVerb::Hold,
            asset,
            amount: rust_decimal::Decimal::ZERO,
        },
        1.0,
        "conservative hold: coordination did not complete in time",
    );
    CoordinationStrategy {
        primary,
        supporting: Vec::new(),
        execution_plan: Vec::new(),
        mode,
        rounds: 0,
        consensus_reached: false,
        participating_agents: Vec::new(),
        unavailable_agents: Vec::new(),
        failed_agents: Vec::new(),
        conflicts_detected: 0,
        adapted_for_missing_agents: false,
        adapted_for_failures: false,
    }
}

fn count_conflicts(decisions: &[AgentDecision]) -> usize {
    let mut conflicts = 0;
    for (i, a) in decisions.iter().enumerate() {
        for b in decisions.iter().skip(i + 1) {
            if a.action.opposes(&b.action) {
                conflicts += 1;
            }
        }
    }
    conflicts
}

/// Population variance of the confidence scores
fn confidence_variance(decisions: &[AgentDecision]) -> f64 {
    let n = decisions.len() as f64;
    let mean = decisions.iter().map(|d| d.confidence).sum::<f64>() / n;
    decisions
        .iter()
        .map(|d| (d.confidence - mean).powi(2))
        .sum::<f64>()
        / n
}

/// Pick the primary decision under the given policy; everything else
/// becomes supporting context.
fn resolve(policy: ConflictPolicy, decisions: &[AgentDecision]) -> (AgentDecision, Vec<AgentDecision>) {
    let score = |decision: &AgentDecision| -> f64 {
        match policy {
            ConflictPolicy::Consensus => {
                let agreeing = decisions
                    .iter()
                    .filter(|d| {
                        d.action.asset() == decision.action.asset()
                            && d.action.direction() == decision.action.direction()
                    })
                    .count() as f64;
                decision.confidence * (agreeing / decisions.len() as f64)
            }
            ConflictPolicy::RiskWeighted => decision.confidence * (1.0 - risk_weight(&decision.action)),
        }
    };

    let (primary_idx, _) = decisions
        .iter()
        .enumerate()
        .map(|(i, d)| (i, score(d)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or((0, 0.0));

    let primary = decisions[primary_idx].clone();
    let supporting = decisions
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != primary_idx)
        .map(|(_, d)| d.clone())
        .collect();
    (primary, supporting)
}

/// How much risk an action takes on, in [0, 1]
fn risk_weight(action: &DecisionAction) -> f64 {
    use crate::agents::{LendingVerb, LiquidityVerb};
    match action {
        DecisionAction::Lending { verb, .. } => match verb {
            LendingVerb::Borrow => 0.7,
            LendingVerb::Supply => 0.3,
            LendingVerb::Withdraw => 0.4,
            LendingVerb::Repay => 0.2,
            LendingVerb::Hold => 0.0,
        },
        DecisionAction::Liquidity { verb, .. } => match verb {
            LiquidityVerb::AddLiquidity => 0.5,
            LiquidityVerb::RemoveLiquidity => 0.4,
            LiquidityVerb::Swap => 0.5,
            LiquidityVerb::Hold => 0.0,
        },
        DecisionAction::Market { verb, .. } => match verb {
            MarketVerb::Buy => 0.6,
            MarketVerb::Sell => 0.5,
            MarketVerb::Hold => 0.0,
        },
    }
}

/// Lending first, then liquidity, then market; holds are dropped.
fn build_plan(decisions: &[AgentDecision]) -> Vec<PlanStep> {
    let rank = |kind: AgentKind| match kind {
        AgentKind::Lending => 0,
        AgentKind::Liquidity => 1,
        AgentKind::Market => 2,
    };
    let mut actionable: Vec<&AgentDecision> =
        decisions.iter().filter(|d| !d.action.is_hold()).collect();
    actionable.sort_by_key(|d| rank(d.action.kind()));
    actionable
        .into_iter()
        .map(|d| PlanStep {
            agent_id: d.agent_id.clone(),
            action: d.action.clone(),
        })
        .collect()
}
