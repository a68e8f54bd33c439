use std::sync::Arc;

use crate::workflows::hiring::credential::CredentialSigner;
use crate::workflows::hiring::domain::{
    AgentKind, AgentOutput, AgentResponse, ApplicationId, BiasReviewOutput, BiasVerdict,
    CandidateId, CompanyFairnessOutput, CredentialReceiptOutput, JobId, MatchingOutput,
    SkillEvidenceOutput, TestSchedulingOutput,
};
use crate::workflows::hiring::events::MemoryPublisher;
use crate::workflows::hiring::gateway::ScriptedGateway;
use crate::workflows::hiring::memory::InMemoryStore;
use crate::workflows::hiring::service::{ApplicationIntake, HiringPipelineService};
use crate::workflows::hiring::stage::PipelineConfig;

pub(super) type TestService = HiringPipelineService<InMemoryStore, ScriptedGateway, MemoryPublisher>;

/// Fast-feedback dials: batch of two and millisecond backoff so retry and
/// batching behavior stays observable without slowing the suite down.
pub(super) fn test_config() -> PipelineConfig {
    PipelineConfig {
        bias_batch_size: 2,
        retry_base_delay_ms: 1,
        ..PipelineConfig::default()
    }
}

pub(super) fn build_service(
    config: PipelineConfig,
) -> (
    Arc<TestService>,
    Arc<InMemoryStore>,
    Arc<ScriptedGateway>,
    Arc<MemoryPublisher>,
) {
    let store = Arc::new(InMemoryStore::default());
    let gateway = Arc::new(ScriptedGateway::with_defaults());
    let publisher = Arc::new(MemoryPublisher::default());
    let service = Arc::new(HiringPipelineService::new(
        store.clone(),
        gateway.clone(),
        publisher.clone(),
        CredentialSigner::ephemeral(),
        config,
    ));
    (service, store, gateway, publisher)
}

pub(super) fn intake(id: &str) -> ApplicationIntake {
    ApplicationIntake {
        application_id: Some(id.to_string()),
        candidate_id: CandidateId(format!("cand-{id}")),
        job_id: JobId(format!("job-{id}")),
    }
}

pub(super) fn app_id(id: &str) -> ApplicationId {
    ApplicationId(id.to_string())
}

pub(super) fn company_response(fairness_score: Option<f64>) -> AgentResponse {
    AgentResponse {
        output: AgentOutput::CompanyFairness(CompanyFairnessOutput {
            fairness_score,
            extra: Default::default(),
        }),
        explanation: None,
    }
}

pub(super) fn evidence_response(portfolio_score: Option<f64>) -> AgentResponse {
    AgentResponse {
        output: AgentOutput::SkillEvidence(SkillEvidenceOutput {
            portfolio_score,
            extra: Default::default(),
        }),
        explanation: None,
    }
}

pub(super) fn bias_response(verdict: BiasVerdict) -> AgentResponse {
    AgentResponse {
        output: AgentOutput::BiasReview(BiasReviewOutput {
            verdict,
            extra: Default::default(),
        }),
        explanation: None,
    }
}

pub(super) fn match_response(match_score: Option<f64>) -> AgentResponse {
    AgentResponse {
        output: AgentOutput::Matching(MatchingOutput {
            match_score,
            extra: Default::default(),
        }),
        explanation: None,
    }
}

pub(super) fn test_response(scheduled: bool) -> AgentResponse {
    AgentResponse {
        output: AgentOutput::TestScheduling(TestSchedulingOutput {
            scheduled,
            extra: Default::default(),
        }),
        explanation: None,
    }
}

pub(super) fn passport_response(reference: &str) -> AgentResponse {
    AgentResponse {
        output: AgentOutput::CredentialReceipt(CredentialReceiptOutput {
            reference: Some(reference.to_string()),
            extra: Default::default(),
        }),
        explanation: None,
    }
}

/// Push `id` through company and skill verification so it sits parked in
/// front of the bias batch.
pub(super) async fn advance_to_bias(service: &TestService, id: &ApplicationId) {
    service.advance(id).await.expect("company stage completes");
    service.advance(id).await.expect("skill stage completes");
    service.advance(id).await.expect("bias parking succeeds");
}

/// Set the evidence response for every skill source at once.
pub(super) fn script_evidence(gateway: &ScriptedGateway, portfolio_score: Option<f64>) {
    for source in [
        AgentKind::Ats,
        AgentKind::Github,
        AgentKind::Leetcode,
        AgentKind::Codeforces,
        AgentKind::Linkedin,
    ] {
        gateway.respond_with(source, evidence_response(portfolio_score));
    }
}
