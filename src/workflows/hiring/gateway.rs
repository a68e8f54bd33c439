use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::domain::{AgentKind, AgentOutput, AgentResponse, ApplicationId, BiasVerdict};
use super::domain::{
    BiasReviewOutput, CompanyFairnessOutput, CredentialReceiptOutput, MatchingOutput,
    SkillEvidenceOutput, TestSchedulingOutput,
};

/// Classified failures from one invocation attempt. Retry policy lives with
/// the orchestrator, never inside the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("agent {agent} timed out after {timeout_seconds}s for application {application_id}")]
    Timeout {
        agent: AgentKind,
        application_id: ApplicationId,
        timeout_seconds: u64,
    },
    #[error("agent {agent} answered application {application_id} with status {status}")]
    Invocation {
        agent: AgentKind,
        application_id: ApplicationId,
        status: String,
    },
    #[error("agent {agent} returned a malformed payload: {detail}")]
    MalformedOutput { agent: AgentKind, detail: String },
    #[error("transport failure reaching agent {agent}: {detail}")]
    Transport { agent: AgentKind, detail: String },
}

impl GatewayError {
    /// Timeouts, upstream failures, and transport faults may be retried with
    /// unchanged input; malformed payloads will not improve on retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, GatewayError::MalformedOutput { .. })
    }
}

/// Uniform client abstraction for invoking any verification agent.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    async fn invoke(
        &self,
        agent: AgentKind,
        application_id: &ApplicationId,
        payload: Value,
    ) -> Result<AgentResponse, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    explanation: Option<String>,
}

/// HTTP gateway posting `{application_id, ...payload}` to each agent's
/// configured endpoint with a bounded per-call timeout.
pub struct HttpAgentGateway {
    client: reqwest::Client,
    base_url: String,
    timeout_seconds: u64,
}

impl HttpAgentGateway {
    pub fn new(base_url: impl Into<String>, timeout_seconds: u64) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_seconds,
        })
    }

    fn endpoint(&self, agent: AgentKind) -> String {
        format!("{}/agents/{}/invoke", self.base_url, agent.label())
    }

    fn request_body(application_id: &ApplicationId, payload: Value) -> Value {
        let mut body = match payload {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        body.insert("application_id".to_string(), json!(application_id.0));
        Value::Object(body)
    }
}

#[async_trait]
impl AgentGateway for HttpAgentGateway {
    async fn invoke(
        &self,
        agent: AgentKind,
        application_id: &ApplicationId,
        payload: Value,
    ) -> Result<AgentResponse, GatewayError> {
        let body = Self::request_body(application_id, payload);

        let response = self
            .client
            .post(self.endpoint(agent))
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    GatewayError::Timeout {
                        agent,
                        application_id: application_id.clone(),
                        timeout_seconds: self.timeout_seconds,
                    }
                } else {
                    GatewayError::Transport {
                        agent,
                        detail: err.to_string(),
                    }
                }
            })?;

        let http_status = response.status();
        if !http_status.is_success() {
            return Err(GatewayError::Invocation {
                agent,
                application_id: application_id.clone(),
                status: http_status.as_u16().to_string(),
            });
        }

        let wire: WireResponse =
            response
                .json()
                .await
                .map_err(|err| GatewayError::MalformedOutput {
                    agent,
                    detail: err.to_string(),
                })?;

        if !matches!(wire.status.as_str(), "ok" | "success" | "succeeded") {
            return Err(GatewayError::Invocation {
                agent,
                application_id: application_id.clone(),
                status: wire.status,
            });
        }

        let output =
            AgentOutput::from_wire(agent, wire.output).map_err(|err| {
                GatewayError::MalformedOutput {
                    agent,
                    detail: err.to_string(),
                }
            })?;

        Ok(AgentResponse {
            output,
            explanation: wire.explanation,
        })
    }
}

/// In-process gateway for tests and the CLI demo. Queued responses are served
/// first, then the per-agent fixed response; every call is logged so tests can
/// assert exactly which invocations happened.
#[derive(Default)]
pub struct ScriptedGateway {
    queued: Mutex<HashMap<AgentKind, VecDeque<Result<AgentResponse, GatewayError>>>>,
    fixed: Mutex<HashMap<AgentKind, AgentResponse>>,
    calls: Mutex<Vec<(AgentKind, ApplicationId)>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Happy-path script: fairness 75, uniformly strong-ish evidence, clear
    /// bias verdict, match score 0.82.
    pub fn with_defaults() -> Self {
        let gateway = Self::new();
        gateway.respond_with(
            AgentKind::Company,
            AgentResponse {
                output: AgentOutput::CompanyFairness(CompanyFairnessOutput {
                    fairness_score: Some(75.0),
                    extra: Default::default(),
                }),
                explanation: None,
            },
        );
        for source in [
            AgentKind::Ats,
            AgentKind::Github,
            AgentKind::Leetcode,
            AgentKind::Codeforces,
            AgentKind::Linkedin,
        ] {
            gateway.respond_with(
                source,
                AgentResponse {
                    output: AgentOutput::SkillEvidence(SkillEvidenceOutput {
                        portfolio_score: Some(65.0),
                        extra: Default::default(),
                    }),
                    explanation: None,
                },
            );
        }
        gateway.respond_with(
            AgentKind::Bias,
            AgentResponse {
                output: AgentOutput::BiasReview(BiasReviewOutput {
                    verdict: BiasVerdict::Clear,
                    extra: Default::default(),
                }),
                explanation: None,
            },
        );
        gateway.respond_with(
            AgentKind::Test,
            AgentResponse {
                output: AgentOutput::TestScheduling(TestSchedulingOutput {
                    scheduled: true,
                    extra: Default::default(),
                }),
                explanation: None,
            },
        );
        gateway.respond_with(
            AgentKind::Match,
            AgentResponse {
                output: AgentOutput::Matching(MatchingOutput {
                    match_score: Some(0.82),
                    extra: Default::default(),
                }),
                explanation: None,
            },
        );
        gateway.respond_with(
            AgentKind::Passport,
            AgentResponse {
                output: AgentOutput::CredentialReceipt(CredentialReceiptOutput {
                    reference: Some("passport-demo".to_string()),
                    extra: Default::default(),
                }),
                explanation: None,
            },
        );
        gateway
    }

    /// Fixed response served whenever the queue for `agent` is empty.
    pub fn respond_with(&self, agent: AgentKind, response: AgentResponse) {
        self.fixed
            .lock()
            .expect("scripted gateway mutex poisoned")
            .insert(agent, response);
    }

    /// Queue a one-shot result consumed ahead of the fixed response.
    pub fn enqueue(&self, agent: AgentKind, result: Result<AgentResponse, GatewayError>) {
        self.queued
            .lock()
            .expect("scripted gateway mutex poisoned")
            .entry(agent)
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self) -> Vec<(AgentKind, ApplicationId)> {
        self.calls
            .lock()
            .expect("scripted gateway mutex poisoned")
            .clone()
    }

    pub fn call_count(&self, agent: AgentKind) -> usize {
        self.calls()
            .iter()
            .filter(|(kind, _)| *kind == agent)
            .count()
    }
}

#[async_trait]
impl AgentGateway for ScriptedGateway {
    async fn invoke(
        &self,
        agent: AgentKind,
        application_id: &ApplicationId,
        _payload: Value,
    ) -> Result<AgentResponse, GatewayError> {
        self.calls
            .lock()
            .expect("scripted gateway mutex poisoned")
            .push((agent, application_id.clone()));

        if let Some(result) = self
            .queued
            .lock()
            .expect("scripted gateway mutex poisoned")
            .get_mut(&agent)
            .and_then(VecDeque::pop_front)
        {
            return result;
        }

        match self
            .fixed
            .lock()
            .expect("scripted gateway mutex poisoned")
            .get(&agent)
        {
            Some(response) => Ok(response.clone()),
            None => Err(GatewayError::Transport {
                agent,
                detail: format!("no scripted response for agent {agent}"),
            }),
        }
    }
}
