use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use uuid::Uuid;

use super::cache::AgentOutputCache;
use super::credential::{
    CredentialDocument, CredentialSigner, SignatureError, SignedCredential, SigningKeyError,
};
use super::domain::{
    AgentKind, AgentOutput, AgentResponse, AgentRunRecord, AgentRunSource, AgentRunStatus,
    ApplicationId, ApplicationRecord, ApplicationStatus, BiasVerdict, CandidateId, JobId,
    PipelineStage, StagePointer, TerminalOutcome,
};
use super::events::{EventChannel, EventPublisher, PipelineEvent};
use super::gateway::{AgentGateway, GatewayError};
use super::repository::{AuditEntry, CredentialStatusView, PipelineStore, RepositoryError};
use super::stage::{CompanyGate, PipelineConfig, StageMachine};

const ORCHESTRATOR_ACTOR: &str = "pipeline_orchestrator";

static APPLICATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_application_id() -> ApplicationId {
    let id = APPLICATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ApplicationId(format!("app-{id:06}"))
}

/// Intake payload registering one candidate/job pair with the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationIntake {
    #[serde(default)]
    pub application_id: Option<String>,
    pub candidate_id: CandidateId,
    pub job_id: JobId,
}

/// Result of one `advance` call.
#[derive(Debug, Clone)]
pub enum AdvanceOutcome {
    /// One stage completed and a new credential row was issued.
    Progressed(SignedCredential),
    /// No-op: terminal application or a stage that already completed.
    Unchanged(SignedCredential),
    /// The application was parked for the next bias batch run.
    AwaitingBiasBatch(SignedCredential),
}

impl AdvanceOutcome {
    pub fn credential(&self) -> &SignedCredential {
        match self {
            AdvanceOutcome::Progressed(credential)
            | AdvanceOutcome::Unchanged(credential)
            | AdvanceOutcome::AwaitingBiasBatch(credential) => credential,
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            AdvanceOutcome::Progressed(_) => "progressed",
            AdvanceOutcome::Unchanged(_) => "unchanged",
            AdvanceOutcome::AwaitingBiasBatch(_) => "awaiting_bias_batch",
        }
    }
}

/// Summary of one bias batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BiasBatchOutcome {
    pub claimed: usize,
    pub completed: Vec<ApplicationId>,
    pub failed: Vec<(ApplicationId, String)>,
}

/// An application is stuck at its current stage after the bounded retry
/// budget. The application remains in its last good state.
#[derive(Debug, thiserror::Error)]
#[error("application {application_id} stuck at stage {stage}: agent {agent} failed after {attempts} attempt(s)")]
pub struct StageFailure {
    pub application_id: ApplicationId,
    pub stage: PipelineStage,
    pub agent: AgentKind,
    pub attempts: u32,
    #[source]
    pub cause: GatewayError,
}

/// Error raised by the pipeline service.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Stage(#[from] StageFailure),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Signing(#[from] SigningKeyError),
}

/// Orchestrator sequencing one application through the verification pipeline
/// in the fixed order: invoke agent, classify, compute next state, persist
/// credential, publish event, audit.
pub struct HiringPipelineService<S, G, P> {
    store: Arc<S>,
    gateway: Arc<G>,
    events: Arc<P>,
    signer: CredentialSigner,
    machine: StageMachine,
    cache: Option<AgentOutputCache>,
    locks: Mutex<HashMap<ApplicationId, Arc<AsyncMutex<()>>>>,
    gate: Semaphore,
}

impl<S, G, P> HiringPipelineService<S, G, P>
where
    S: PipelineStore + 'static,
    G: AgentGateway + 'static,
    P: EventPublisher + 'static,
{
    pub fn new(
        store: Arc<S>,
        gateway: Arc<G>,
        events: Arc<P>,
        signer: CredentialSigner,
        config: PipelineConfig,
    ) -> Self {
        let cache = config
            .enable_llm_cache
            .then(|| AgentOutputCache::new(config.cache_ttl_seconds));
        let gate = Semaphore::new(config.agent_concurrency.max(1));

        Self {
            store,
            gateway,
            events,
            signer,
            machine: StageMachine::new(config),
            cache,
            locks: Mutex::new(HashMap::new()),
            gate,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        self.machine.config()
    }

    /// Register an application arriving from the intake boundary.
    pub fn register(&self, intake: ApplicationIntake) -> Result<ApplicationRecord, PipelineError> {
        let application_id = intake
            .application_id
            .map(ApplicationId)
            .unwrap_or_else(next_application_id);
        let record = ApplicationRecord::new(application_id, intake.candidate_id, intake.job_id);
        let stored = self.store.insert(record)?;
        self.audit(
            Some(&stored.application_id),
            "application_registered",
            json!({
                "candidate_id": stored.candidate_id.0,
                "job_id": stored.job_id.0,
            }),
        )?;
        Ok(stored)
    }

    /// Drive one application one stage forward. Idempotent: terminal
    /// applications and already-completed stages return the authoritative
    /// credential without invoking any agent.
    pub async fn advance(&self, id: &ApplicationId) -> Result<AdvanceOutcome, PipelineError> {
        self.advance_inner(id, None).await
    }

    /// Advance toward a specific stage; a no-op unless `stage` is exactly the
    /// next unreached one.
    pub async fn advance_stage(
        &self,
        id: &ApplicationId,
        stage: PipelineStage,
    ) -> Result<AdvanceOutcome, PipelineError> {
        self.advance_inner(id, Some(stage)).await
    }

    async fn advance_inner(
        &self,
        id: &ApplicationId,
        requested: Option<PipelineStage>,
    ) -> Result<AdvanceOutcome, PipelineError> {
        let lock = self.advancement_lock(id);
        let _guard = lock.lock().await;
        self.advance_locked(id, requested).await
    }

    /// Exclusive advancement lock keyed by application id; held for one
    /// invoke-persist-publish-audit sequence only.
    fn advancement_lock(&self, id: &ApplicationId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("advancement lock map poisoned");
        locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn advance_locked(
        &self,
        id: &ApplicationId,
        requested: Option<PipelineStage>,
    ) -> Result<AdvanceOutcome, PipelineError> {
        let application = self.store.fetch(id)?.ok_or(RepositoryError::NotFound)?;

        let latest = self.store.latest_credential(id)?;
        let document = match &latest {
            Some(signed) => signed.verified_document()?.clone(),
            None => CredentialDocument::genesis(
                application.application_id.clone(),
                application.candidate_id.clone(),
            ),
        };

        let authoritative = match latest {
            Some(signed) => signed,
            None => self.signer.sign(document.clone())?,
        };

        let next_stage = match document.current_stage {
            StagePointer::Terminal(_) => {
                return Ok(AdvanceOutcome::Unchanged(authoritative));
            }
            StagePointer::Next(stage) => stage,
        };

        if let Some(wanted) = requested {
            if wanted != next_stage {
                // Already past (or not yet entitled to) the requested stage.
                return Ok(AdvanceOutcome::Unchanged(authoritative));
            }
        }

        match next_stage {
            PipelineStage::CompanyVerification => {
                self.run_company_stage(application, &document).await
            }
            PipelineStage::SkillVerification => {
                self.run_skill_stage(application, &document).await
            }
            PipelineStage::BiasDetection => {
                self.park_for_bias_batch(application, authoritative)
            }
            PipelineStage::Matching => self.run_matching_stage(application, &document).await,
            PipelineStage::CredentialIssuance => {
                self.run_issuance_stage(application, &document).await
            }
        }
    }

    async fn run_company_stage(
        &self,
        mut application: ApplicationRecord,
        document: &CredentialDocument,
    ) -> Result<AdvanceOutcome, PipelineError> {
        let payload = json!({
            "candidate_id": application.candidate_id.0,
            "job_id": application.job_id.0,
        });
        let response = self
            .invoke_agent(
                &application,
                PipelineStage::CompanyVerification,
                AgentKind::Company,
                payload,
            )
            .await?;

        let fairness = match &response.output {
            AgentOutput::CompanyFairness(output) => output.fairness_score,
            _ => None,
        };
        application.fairness_score = fairness;

        let stage_result = json!({
            "fairness_score": fairness,
            "explanation": response.explanation,
        });
        let test_required = application.test_required;

        let signed = match self.machine.company_gate(fairness) {
            CompanyGate::Cleared => self.complete_stage(
                &mut application,
                document,
                PipelineStage::CompanyVerification,
                self.machine.pointer_after(PipelineStage::CompanyVerification),
                ApplicationStatus::InReview,
                test_required,
                stage_result,
                Some((
                    EventChannel::CompanyVerified,
                    json!({ "outcome": "cleared", "fairness_score": fairness }),
                )),
            )?,
            CompanyGate::Rejected => self.complete_stage(
                &mut application,
                document,
                PipelineStage::CompanyVerification,
                StagePointer::Terminal(TerminalOutcome::Rejected),
                ApplicationStatus::Rejected,
                test_required,
                stage_result,
                Some((
                    EventChannel::CompanyVerified,
                    json!({ "outcome": "rejected", "fairness_score": fairness }),
                )),
            )?,
        };

        Ok(AdvanceOutcome::Progressed(signed))
    }

    async fn run_skill_stage(
        &self,
        mut application: ApplicationRecord,
        document: &CredentialDocument,
    ) -> Result<AdvanceOutcome, PipelineError> {
        let sources = self.machine.config().skill_evidence_sources.clone();
        let mut scores: Vec<Option<f64>> = Vec::with_capacity(sources.len());
        let mut by_source = serde_json::Map::new();

        for source in sources {
            let payload = json!({ "candidate_id": application.candidate_id.0 });
            let response = self
                .invoke_agent(
                    &application,
                    PipelineStage::SkillVerification,
                    source,
                    payload,
                )
                .await?;

            let score = match &response.output {
                AgentOutput::SkillEvidence(output) => output.portfolio_score,
                _ => None,
            };
            scores.push(score);
            by_source.insert(source.label().to_string(), json!(score));
        }

        let portfolio = StageMachine::aggregate_portfolio(&scores);
        let test_required = self.machine.test_required(portfolio);
        application.test_required = test_required;

        let mut test_scheduled = false;
        if test_required {
            let payload = json!({ "candidate_id": application.candidate_id.0 });
            let response = self
                .invoke_agent(
                    &application,
                    PipelineStage::SkillVerification,
                    AgentKind::Test,
                    payload,
                )
                .await?;
            test_scheduled = matches!(
                &response.output,
                AgentOutput::TestScheduling(output) if output.scheduled
            );
        }

        let stage_result = json!({
            "portfolio_score": portfolio,
            "test_required": test_required,
            "test_scheduled": test_scheduled,
            "sources": Value::Object(by_source),
        });

        let signed = self.complete_stage(
            &mut application,
            document,
            PipelineStage::SkillVerification,
            self.machine.pointer_after(PipelineStage::SkillVerification),
            ApplicationStatus::InReview,
            test_required,
            stage_result,
            Some((
                EventChannel::SkillVerified,
                json!({ "portfolio_score": portfolio, "test_required": test_required }),
            )),
        )?;

        Ok(AdvanceOutcome::Progressed(signed))
    }

    /// Bias detection never runs per application in isolation: mark the
    /// application eligible and wait for the batch trigger.
    fn park_for_bias_batch(
        &self,
        application: ApplicationRecord,
        authoritative: SignedCredential,
    ) -> Result<AdvanceOutcome, PipelineError> {
        if !application.bias_eligible {
            self.store.mark_bias_eligible(&application.application_id)?;
            self.audit(
                Some(&application.application_id),
                "bias_eligibility_marked",
                json!({ "batch_size": self.machine.config().bias_batch_size }),
            )?;
        }
        Ok(AdvanceOutcome::AwaitingBiasBatch(authoritative))
    }

    async fn run_matching_stage(
        &self,
        mut application: ApplicationRecord,
        document: &CredentialDocument,
    ) -> Result<AdvanceOutcome, PipelineError> {
        let payload = json!({
            "candidate_id": application.candidate_id.0,
            "job_id": application.job_id.0,
        });
        let response = self
            .invoke_agent(
                &application,
                PipelineStage::Matching,
                AgentKind::Match,
                payload,
            )
            .await?;

        let match_score = match &response.output {
            AgentOutput::Matching(output) => output.match_score,
            _ => None,
        };
        let match_score = match match_score {
            Some(score) => score,
            None => {
                return Err(StageFailure {
                    application_id: application.application_id.clone(),
                    stage: PipelineStage::Matching,
                    agent: AgentKind::Match,
                    attempts: 1,
                    cause: GatewayError::MalformedOutput {
                        agent: AgentKind::Match,
                        detail: "match agent omitted match_score".to_string(),
                    },
                }
                .into());
            }
        };
        application.match_score = Some(match_score);
        let test_required = application.test_required;

        let signed = self.complete_stage(
            &mut application,
            document,
            PipelineStage::Matching,
            self.machine.pointer_after(PipelineStage::Matching),
            ApplicationStatus::InReview,
            test_required,
            json!({ "match_score": match_score }),
            Some((
                EventChannel::MatchCompleted,
                json!({ "match_score": match_score }),
            )),
        )?;

        Ok(AdvanceOutcome::Progressed(signed))
    }

    async fn run_issuance_stage(
        &self,
        mut application: ApplicationRecord,
        document: &CredentialDocument,
    ) -> Result<AdvanceOutcome, PipelineError> {
        let payload = json!({
            "candidate_id": application.candidate_id.0,
            "stages_completed": document
                .stages_completed
                .iter()
                .map(|stage| stage.label())
                .collect::<Vec<_>>(),
        });
        let response = self
            .invoke_agent(
                &application,
                PipelineStage::CredentialIssuance,
                AgentKind::Passport,
                payload,
            )
            .await?;

        let reference = match &response.output {
            AgentOutput::CredentialReceipt(output) => output.reference.clone(),
            _ => None,
        };

        let test_required = application.test_required;
        let signed = self.complete_stage(
            &mut application,
            document,
            PipelineStage::CredentialIssuance,
            self.machine.pointer_after(PipelineStage::CredentialIssuance),
            ApplicationStatus::Approved,
            test_required,
            json!({ "receipt": reference }),
            Some((
                EventChannel::CredentialIssued,
                json!({ "status": ApplicationStatus::Approved.label() }),
            )),
        )?;

        Ok(AdvanceOutcome::Progressed(signed))
    }

    /// Process the accumulated bias queue once the batch threshold is met.
    /// A failed member is re-queued for a later batch; the rest proceed.
    pub async fn run_bias_batch(&self) -> Result<BiasBatchOutcome, PipelineError> {
        let claimed = self
            .store
            .claim_bias_eligible(self.machine.config().bias_batch_size)?;

        let mut outcome = BiasBatchOutcome {
            claimed: claimed.len(),
            ..BiasBatchOutcome::default()
        };
        if claimed.is_empty() {
            return Ok(outcome);
        }

        self.audit(
            None,
            "bias_batch_claimed",
            json!({ "size": claimed.len() }),
        )?;

        for id in claimed {
            let lock = self.advancement_lock(&id);
            let _guard = lock.lock().await;
            match self.run_bias_stage(&id).await {
                Ok(_) => outcome.completed.push(id),
                Err(err) => {
                    tracing::warn!(
                        application_id = %id,
                        error = %err,
                        "bias check failed; re-queueing for a later batch"
                    );
                    if let Err(requeue_err) = self.store.mark_bias_eligible(&id) {
                        tracing::warn!(
                            application_id = %id,
                            error = %requeue_err,
                            "failed to re-queue application for bias review"
                        );
                    }
                    outcome.failed.push((id, err.to_string()));
                }
            }
        }

        Ok(outcome)
    }

    async fn run_bias_stage(&self, id: &ApplicationId) -> Result<SignedCredential, PipelineError> {
        let mut application = self.store.fetch(id)?.ok_or(RepositoryError::NotFound)?;
        let signed = self
            .store
            .latest_credential(id)?
            .ok_or(RepositoryError::NotFound)?;
        let document = signed.verified_document()?.clone();

        match document.current_stage {
            StagePointer::Next(PipelineStage::BiasDetection) => {}
            // Claimed but already moved on; nothing to redo.
            _ => return Ok(signed),
        }

        let payload = json!({ "candidate_id": application.candidate_id.0 });
        let response = self
            .invoke_agent(
                &application,
                PipelineStage::BiasDetection,
                AgentKind::Bias,
                payload,
            )
            .await?;

        let verdict = match &response.output {
            AgentOutput::BiasReview(output) => output.verdict,
            // Fail closed: an unreadable verdict is treated as flagged.
            _ => BiasVerdict::Flagged,
        };

        let event = match verdict {
            BiasVerdict::Flagged => Some((
                EventChannel::BiasAlert,
                json!({ "verdict": "flagged", "explanation": response.explanation }),
            )),
            BiasVerdict::Clear => None,
        };

        let test_required = application.test_required;
        let signed = self.complete_stage(
            &mut application,
            &document,
            PipelineStage::BiasDetection,
            self.machine.pointer_after(PipelineStage::BiasDetection),
            ApplicationStatus::InReview,
            test_required,
            json!({ "verdict": verdict }),
            event,
        )?;

        Ok(signed)
    }

    /// Read-only projection of the authoritative credential.
    pub fn status(&self, id: &ApplicationId) -> Result<CredentialStatusView, PipelineError> {
        match self.store.latest_credential(id)? {
            Some(signed) => {
                signed.verified_document()?;
                Ok(CredentialStatusView::from_credential(&signed))
            }
            None => {
                let application = self.store.fetch(id)?.ok_or(RepositoryError::NotFound)?;
                Ok(CredentialStatusView::pending(&application))
            }
        }
    }

    /// Read-only projection of every recorded invocation attempt.
    pub fn list_runs(&self, id: &ApplicationId) -> Result<Vec<AgentRunRecord>, PipelineError> {
        self.store.fetch(id)?.ok_or(RepositoryError::NotFound)?;
        Ok(self.store.runs_for(id)?)
    }

    /// Scan of the append-only audit trail, optionally scoped to one
    /// application.
    pub fn audit_trail(
        &self,
        id: Option<&ApplicationId>,
    ) -> Result<Vec<AuditEntry>, PipelineError> {
        Ok(self.store.scan(id)?)
    }

    /// Invoke one agent with the bounded retry budget. Every attempt, cache
    /// hit included, appends its own AgentRun row before the result is acted
    /// on, then lands in the audit trail.
    async fn invoke_agent(
        &self,
        application: &ApplicationRecord,
        stage: PipelineStage,
        agent: AgentKind,
        payload: Value,
    ) -> Result<AgentResponse, PipelineError> {
        let id = &application.application_id;

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(agent, &payload) {
                self.record_attempt(id, agent, &payload, Ok(&hit), AgentRunSource::Cache)?;
                self.audit(
                    Some(id),
                    "agent_cache_hit",
                    json!({ "agent": agent.label(), "stage": stage.label() }),
                )?;
                return Ok(hit);
            }
        }

        let max_attempts = 1 + self.machine.config().agent_retry_limit;
        let mut delay = Duration::from_millis(self.machine.config().retry_base_delay_ms.max(1));
        let mut attempt: u32 = 1;

        loop {
            let result = {
                let _permit = self.gate.acquire().await.map_err(|_| StageFailure {
                    application_id: id.clone(),
                    stage,
                    agent,
                    attempts: attempt,
                    cause: GatewayError::Transport {
                        agent,
                        detail: "agent worker pool closed".to_string(),
                    },
                })?;
                self.gateway.invoke(agent, id, payload.clone()).await
            };

            self.record_attempt(id, agent, &payload, result.as_ref(), AgentRunSource::Live)?;
            self.audit(
                Some(id),
                "agent_invoked",
                json!({
                    "agent": agent.label(),
                    "stage": stage.label(),
                    "attempt": attempt,
                    "outcome": match &result {
                        Ok(_) => "succeeded".to_string(),
                        Err(err) => err.to_string(),
                    },
                }),
            )?;

            match result {
                Ok(response) => {
                    if let Some(cache) = &self.cache {
                        cache.put(agent, &payload, response.clone());
                    }
                    return Ok(response);
                }
                Err(cause) => {
                    if cause.is_recoverable() && attempt < max_attempts {
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                        attempt += 1;
                        continue;
                    }
                    return Err(StageFailure {
                        application_id: id.clone(),
                        stage,
                        agent,
                        attempts: attempt,
                        cause,
                    }
                    .into());
                }
            }
        }
    }

    fn record_attempt(
        &self,
        id: &ApplicationId,
        agent: AgentKind,
        input: &Value,
        result: Result<&AgentResponse, &GatewayError>,
        source: AgentRunSource,
    ) -> Result<(), RepositoryError> {
        let (output, status, error) = match result {
            Ok(response) => (Some(response.output.clone()), AgentRunStatus::Succeeded, None),
            Err(err) => (None, AgentRunStatus::Failed, Some(err.to_string())),
        };

        self.store.record_run(AgentRunRecord {
            run_id: Uuid::new_v4(),
            application_id: id.clone(),
            agent,
            input: input.clone(),
            output,
            status,
            source,
            error,
            created_at: Utc::now(),
        })
    }

    /// Persist one completed stage: issue and append the successor credential,
    /// mutate the application row, then notify and audit. Events are best
    /// effort and never roll back the committed writes.
    #[allow(clippy::too_many_arguments)]
    fn complete_stage(
        &self,
        application: &mut ApplicationRecord,
        document: &CredentialDocument,
        stage: PipelineStage,
        pointer: StagePointer,
        status: ApplicationStatus,
        test_required: bool,
        stage_result: Value,
        event: Option<(EventChannel, Value)>,
    ) -> Result<SignedCredential, PipelineError> {
        let next_document = document.advanced(stage, pointer, status, test_required, stage_result);
        let signed = self.signer.sign(next_document)?;
        self.store.append_credential(signed.clone())?;

        application.status = status;
        application.test_required = test_required;
        self.store.update(application.clone())?;

        if let Some((channel, payload)) = event {
            let event = PipelineEvent::new(channel, application.application_id.clone(), payload);
            if let Err(err) = self.events.publish(event) {
                tracing::warn!(
                    application_id = %application.application_id,
                    channel = channel.label(),
                    error = %err,
                    "event publication failed; credential remains authoritative"
                );
            }
        }

        self.audit(
            Some(&application.application_id),
            "stage_completed",
            json!({
                "stage": stage.label(),
                "next": pointer.label(),
                "status": status.label(),
            }),
        )?;

        Ok(signed)
    }

    fn audit(
        &self,
        id: Option<&ApplicationId>,
        action: &str,
        metadata: Value,
    ) -> Result<(), RepositoryError> {
        self.store.record(AuditEntry::new(
            ORCHESTRATOR_ACTOR,
            action,
            id.cloned(),
            metadata,
        ))
    }
}
