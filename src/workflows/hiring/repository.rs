use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::credential::SignedCredential;
use super::domain::{AgentRunRecord, ApplicationId, ApplicationRecord};

/// Error enumeration for storage failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Application rows: created at intake, status-mutated by the orchestrator,
/// never deleted. The eligibility flag backs the bias batch trigger.
pub trait ApplicationRepository: Send + Sync {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError>;
    fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError>;
    fn update(&self, record: ApplicationRecord) -> Result<(), RepositoryError>;
    fn mark_bias_eligible(&self, id: &ApplicationId) -> Result<(), RepositoryError>;
    /// Atomically claim and clear the eligibility flag of every queued
    /// application, but only once at least `min_batch` are queued. Two
    /// concurrent claims can never return the same id.
    fn claim_bias_eligible(&self, min_batch: usize)
        -> Result<Vec<ApplicationId>, RepositoryError>;
}

/// Append-only invocation log. Rows are never mutated after completion.
pub trait AgentRunRepository: Send + Sync {
    fn record_run(&self, run: AgentRunRecord) -> Result<(), RepositoryError>;
    fn runs_for(&self, id: &ApplicationId) -> Result<Vec<AgentRunRecord>, RepositoryError>;
}

/// Append-only credential rows; reissued on every stage advance.
pub trait CredentialRepository: Send + Sync {
    fn append_credential(&self, credential: SignedCredential) -> Result<(), RepositoryError>;
    fn latest_credential(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<SignedCredential>, RepositoryError>;
    fn credential_history(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<SignedCredential>, RepositoryError>;
}

/// Immutable compliance entry recorded after the corresponding state mutation
/// commits, never before.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<ApplicationId>,
    pub metadata: Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        application_id: Option<ApplicationId>,
        metadata: Value,
    ) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            application_id,
            metadata,
            recorded_at: Utc::now(),
        }
    }
}

/// Append/scan-only audit surface. No update or delete exists here.
pub trait AuditTrail: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<(), RepositoryError>;
    fn scan(&self, id: Option<&ApplicationId>) -> Result<Vec<AuditEntry>, RepositoryError>;
}

/// One-stop bound for the orchestrator's storage handle.
pub trait PipelineStore:
    ApplicationRepository + AgentRunRepository + CredentialRepository + AuditTrail
{
}

impl<T> PipelineStore for T where
    T: ApplicationRepository + AgentRunRepository + CredentialRepository + AuditTrail
{
}

/// Sanitized projection of an application's authoritative credential for API
/// responses; the only read surface over the underlying store.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatusView {
    pub application_id: ApplicationId,
    pub status: &'static str,
    pub current_stage: String,
    pub stages_completed: Vec<&'static str>,
    pub test_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_score: Option<f64>,
    pub verified: bool,
}

impl CredentialStatusView {
    pub fn from_credential(credential: &SignedCredential) -> Self {
        let document = &credential.document;
        let match_score = document
            .stage_results
            .get(super::domain::PipelineStage::Matching.label())
            .and_then(|result| result.get("match_score"))
            .and_then(Value::as_f64);

        Self {
            application_id: document.application_id.clone(),
            status: document.status.label(),
            current_stage: document.current_stage.label(),
            stages_completed: document
                .stages_completed
                .iter()
                .map(|stage| stage.label())
                .collect(),
            test_required: document.test_required,
            match_score,
            verified: credential.verify(),
        }
    }

    /// Projection for applications that have not completed any stage yet.
    pub fn pending(application: &ApplicationRecord) -> Self {
        Self {
            application_id: application.application_id.clone(),
            status: application.status.label(),
            current_stage: super::domain::PipelineStage::CompanyVerification
                .label()
                .to_string(),
            stages_completed: Vec::new(),
            test_required: application.test_required,
            match_score: application.match_score,
            // No credential has been issued yet, so there is nothing signed
            // to verify.
            verified: false,
        }
    }
}
