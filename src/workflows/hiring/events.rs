use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::domain::ApplicationId;

/// Fixed channel names on the shared pub/sub bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventChannel {
    CompanyVerified,
    SkillVerified,
    BiasAlert,
    MatchCompleted,
    CredentialIssued,
}

impl EventChannel {
    pub const fn label(self) -> &'static str {
        match self {
            EventChannel::CompanyVerified => "company_verified",
            EventChannel::SkillVerified => "skill_verified",
            EventChannel::BiasAlert => "bias_alert",
            EventChannel::MatchCompleted => "match_completed",
            EventChannel::CredentialIssued => "credential_issued",
        }
    }
}

/// Notification emitted after a significant transition. Events are best
/// effort: they are not part of the durability contract.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    pub channel: EventChannel,
    pub application_id: ApplicationId,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(channel: EventChannel, application_id: ApplicationId, payload: Value) -> Self {
        Self {
            channel,
            application_id,
            payload,
            emitted_at: Utc::now(),
        }
    }
}

/// Publication failure. Logged by the orchestrator, never rolled back into
/// the already-committed state writes.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("event transport unavailable: {0}")]
    Transport(String),
}

/// Outbound notification hook for decoupled consumers (dashboards, billing,
/// notifications). Delivery is at most once.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: PipelineEvent) -> Result<(), PublishError>;
}

/// Adapter that surfaces events on the tracing output, tagged with the bus
/// address the deployment would publish to. Stands in for the wire transport
/// in single-process deployments.
pub struct TracingPublisher {
    bus_address: String,
}

impl TracingPublisher {
    pub fn new(bus_address: impl Into<String>) -> Self {
        Self {
            bus_address: bus_address.into(),
        }
    }
}

impl EventPublisher for TracingPublisher {
    fn publish(&self, event: PipelineEvent) -> Result<(), PublishError> {
        tracing::info!(
            bus = %self.bus_address,
            channel = event.channel.label(),
            application_id = %event.application_id,
            payload = %event.payload,
            "pipeline event published"
        );
        Ok(())
    }
}

/// Capturing publisher for tests and the CLI demo.
#[derive(Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().expect("event mutex poisoned").clone()
    }

    pub fn on_channel(&self, channel: EventChannel) -> Vec<PipelineEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.channel == channel)
            .collect()
    }
}

impl EventPublisher for MemoryPublisher {
    fn publish(&self, event: PipelineEvent) -> Result<(), PublishError> {
        self.events
            .lock()
            .expect("event mutex poisoned")
            .push(event);
        Ok(())
    }
}
