use serde::{Deserialize, Serialize};

use super::domain::{AgentKind, PipelineStage, StagePointer, TerminalOutcome};

/// Threshold and policy dials driving the stage state machine. Passed into the
/// service at construction; never read from ambient globals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub company_fairness_threshold: f64,
    pub portfolio_strong_threshold: f64,
    pub bias_batch_size: usize,
    pub enable_llm_cache: bool,
    pub cache_ttl_seconds: u64,
    pub agent_retry_limit: u32,
    pub retry_base_delay_ms: u64,
    pub agent_concurrency: usize,
    pub skill_evidence_sources: Vec<AgentKind>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            company_fairness_threshold: 60.0,
            portfolio_strong_threshold: 70.0,
            bias_batch_size: 50,
            enable_llm_cache: true,
            cache_ttl_seconds: 3600,
            agent_retry_limit: 2,
            retry_base_delay_ms: 250,
            agent_concurrency: 8,
            skill_evidence_sources: vec![
                AgentKind::Ats,
                AgentKind::Github,
                AgentKind::Leetcode,
                AgentKind::Codeforces,
                AgentKind::Linkedin,
            ],
        }
    }
}

/// Branch taken after company verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanyGate {
    Cleared,
    Rejected,
}

/// Pure transition rules for the ordered pipeline. All scoring inputs are
/// optional and fail closed when absent.
#[derive(Debug, Clone)]
pub struct StageMachine {
    config: PipelineConfig,
}

impl StageMachine {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Pointer reached once `completed` finishes on the happy path.
    pub fn pointer_after(&self, completed: PipelineStage) -> StagePointer {
        match completed.successor() {
            Some(next) => StagePointer::Next(next),
            None => StagePointer::Terminal(TerminalOutcome::Approved),
        }
    }

    /// Company fairness gate. Missing scores are treated as below threshold.
    pub fn company_gate(&self, fairness_score: Option<f64>) -> CompanyGate {
        match fairness_score {
            Some(score) if score >= self.config.company_fairness_threshold => CompanyGate::Cleared,
            _ => CompanyGate::Rejected,
        }
    }

    /// Supplementary-test branch within skill verification. A strong portfolio
    /// skips the test; a missing score fails closed and schedules it.
    pub fn test_required(&self, portfolio_score: Option<f64>) -> bool {
        match portfolio_score {
            Some(score) => score < self.config.portfolio_strong_threshold,
            None => true,
        }
    }

    /// Aggregate portfolio strength across evidence sources that reported one.
    pub fn aggregate_portfolio(scores: &[Option<f64>]) -> Option<f64> {
        let reported: Vec<f64> = scores.iter().flatten().copied().collect();
        if reported.is_empty() {
            return None;
        }
        Some(reported.iter().sum::<f64>() / reported.len() as f64)
    }
}
