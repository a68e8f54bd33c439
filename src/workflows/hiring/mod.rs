//! Hiring pipeline orchestration: intake, staged verification, batched bias
//! review, candidate/job matching, and signed credential issuance.
//!
//! Applications move through a fixed stage order. Each completed stage
//! appends a newly signed credential row carrying the cumulative results, so
//! the latest row is always the authoritative view of an application.

pub mod cache;
pub mod credential;
pub mod domain;
pub mod events;
pub mod gateway;
pub mod memory;
pub mod repository;
pub mod router;
pub mod service;
pub mod stage;

#[cfg(test)]
mod tests;

pub use credential::{
    CredentialDocument, CredentialSigner, SignatureError, SignedCredential, SigningKeyError,
    SIGNATURE_SCHEME,
};
pub use domain::{
    AgentKind, AgentOutput, AgentResponse, AgentRunRecord, AgentRunSource, AgentRunStatus,
    ApplicationId, ApplicationRecord, ApplicationStatus, BiasVerdict, CandidateId, JobId,
    PipelineStage, StagePointer, TerminalOutcome,
};
pub use events::{EventChannel, EventPublisher, MemoryPublisher, PipelineEvent, TracingPublisher};
pub use gateway::{AgentGateway, GatewayError, HttpAgentGateway, ScriptedGateway};
pub use memory::InMemoryStore;
pub use repository::{
    AgentRunRepository, ApplicationRepository, AuditEntry, AuditTrail, CredentialRepository,
    CredentialStatusView, PipelineStore, RepositoryError,
};
pub use router::pipeline_router;
pub use service::{
    AdvanceOutcome, ApplicationIntake, BiasBatchOutcome, HiringPipelineService, PipelineError,
    StageFailure,
};
pub use stage::{CompanyGate, PipelineConfig, StageMachine};
