use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifier wrapper for candidate applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the candidate entity owned by the surrounding platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateId(pub String);

/// Reference to the job opening entity owned by the surrounding platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

/// Lifecycle status of one application as it moves through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::InReview => "in_review",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }
}

/// Ordered verification stages forming the canonical hiring pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    CompanyVerification,
    SkillVerification,
    BiasDetection,
    Matching,
    CredentialIssuance,
}

impl PipelineStage {
    pub const ORDER: [PipelineStage; 5] = [
        PipelineStage::CompanyVerification,
        PipelineStage::SkillVerification,
        PipelineStage::BiasDetection,
        PipelineStage::Matching,
        PipelineStage::CredentialIssuance,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            PipelineStage::CompanyVerification => "company_verification",
            PipelineStage::SkillVerification => "skill_verification",
            PipelineStage::BiasDetection => "bias_detection",
            PipelineStage::Matching => "matching",
            PipelineStage::CredentialIssuance => "credential_issuance",
        }
    }

    /// Next stage in pipeline order, or `None` after credential issuance.
    pub const fn successor(self) -> Option<PipelineStage> {
        match self {
            PipelineStage::CompanyVerification => Some(PipelineStage::SkillVerification),
            PipelineStage::SkillVerification => Some(PipelineStage::BiasDetection),
            PipelineStage::BiasDetection => Some(PipelineStage::Matching),
            PipelineStage::Matching => Some(PipelineStage::CredentialIssuance),
            PipelineStage::CredentialIssuance => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Absorbing end states of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Approved,
    Rejected,
}

/// Position marker persisted in the credential: either the next unreached
/// stage or a terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePointer {
    Next(PipelineStage),
    Terminal(TerminalOutcome),
}

impl StagePointer {
    pub fn label(self) -> String {
        match self {
            StagePointer::Next(stage) => stage.label().to_string(),
            StagePointer::Terminal(TerminalOutcome::Approved) => "terminal(approved)".to_string(),
            StagePointer::Terminal(TerminalOutcome::Rejected) => "terminal(rejected)".to_string(),
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, StagePointer::Terminal(_))
    }
}

/// Enumerated verification and evaluation agents reachable through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Company,
    Ats,
    Github,
    Leetcode,
    Codeforces,
    Linkedin,
    Bias,
    Match,
    Test,
    Passport,
}

impl AgentKind {
    pub const fn label(self) -> &'static str {
        match self {
            AgentKind::Company => "company",
            AgentKind::Ats => "ats",
            AgentKind::Github => "github",
            AgentKind::Leetcode => "leetcode",
            AgentKind::Codeforces => "codeforces",
            AgentKind::Linkedin => "linkedin",
            AgentKind::Bias => "bias",
            AgentKind::Match => "match",
            AgentKind::Test => "test",
            AgentKind::Passport => "passport",
        }
    }

    /// Evidence sources consulted during skill verification.
    pub const fn is_skill_evidence(self) -> bool {
        matches!(
            self,
            AgentKind::Ats
                | AgentKind::Github
                | AgentKind::Leetcode
                | AgentKind::Codeforces
                | AgentKind::Linkedin
        )
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Run status recorded for each invocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl AgentRunStatus {
    pub const fn label(self) -> &'static str {
        match self {
            AgentRunStatus::Pending => "pending",
            AgentRunStatus::Running => "running",
            AgentRunStatus::Succeeded => "succeeded",
            AgentRunStatus::Failed => "failed",
        }
    }
}

/// Whether a run's output came from a live call or the read-through cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunSource {
    Live,
    Cache,
}

/// Durable record of one invocation attempt against one agent. Rows are
/// append-only; the latest by `created_at` is authoritative.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRunRecord {
    pub run_id: Uuid,
    pub application_id: ApplicationId,
    pub agent: AgentKind,
    pub input: Value,
    pub output: Option<AgentOutput>,
    pub status: AgentRunStatus,
    pub source: AgentRunSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One candidate's submission to one job opening, owned by this subsystem
/// for status transitions only. Created at the intake boundary, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub application_id: ApplicationId,
    pub candidate_id: CandidateId,
    pub job_id: JobId,
    pub status: ApplicationStatus,
    pub test_required: bool,
    pub match_score: Option<f64>,
    pub fairness_score: Option<f64>,
    pub bias_eligible: bool,
    pub submitted_at: DateTime<Utc>,
}

impl ApplicationRecord {
    pub fn new(application_id: ApplicationId, candidate_id: CandidateId, job_id: JobId) -> Self {
        Self {
            application_id,
            candidate_id,
            job_id,
            status: ApplicationStatus::Pending,
            test_required: false,
            match_score: None,
            fairness_score: None,
            bias_eligible: false,
            submitted_at: Utc::now(),
        }
    }
}

/// Bias review verdict returned by the bias agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasVerdict {
    Clear,
    Flagged,
}

/// Company fairness result. A missing score fails closed at the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyFairnessOutput {
    pub fairness_score: Option<f64>,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Portfolio evidence from a single skill source (ATS, GitHub, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillEvidenceOutput {
    pub portfolio_score: Option<f64>,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Outcome of a batched bias review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasReviewOutput {
    pub verdict: BiasVerdict,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Candidate/job match result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingOutput {
    pub match_score: Option<f64>,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Acknowledgement from the supplementary-test scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSchedulingOutput {
    #[serde(default)]
    pub scheduled: bool,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Receipt from the passport/credential agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialReceiptOutput {
    pub reference: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Tagged union over the known agent result shapes. Each variant keeps an
/// open extension map so newer agent fields survive a round trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentOutput {
    CompanyFairness(CompanyFairnessOutput),
    SkillEvidence(SkillEvidenceOutput),
    BiasReview(BiasReviewOutput),
    Matching(MatchingOutput),
    TestScheduling(TestSchedulingOutput),
    CredentialReceipt(CredentialReceiptOutput),
}

impl AgentOutput {
    /// Validate a raw agent payload into the shape expected for `agent`.
    pub fn from_wire(agent: AgentKind, value: Value) -> Result<Self, serde_json::Error> {
        match agent {
            AgentKind::Company => serde_json::from_value(value).map(AgentOutput::CompanyFairness),
            kind if kind.is_skill_evidence() => {
                serde_json::from_value(value).map(AgentOutput::SkillEvidence)
            }
            AgentKind::Bias => serde_json::from_value(value).map(AgentOutput::BiasReview),
            AgentKind::Match => serde_json::from_value(value).map(AgentOutput::Matching),
            AgentKind::Test => serde_json::from_value(value).map(AgentOutput::TestScheduling),
            _ => serde_json::from_value(value).map(AgentOutput::CredentialReceipt),
        }
    }
}

/// Validated response returned by the gateway for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResponse {
    pub output: AgentOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}
