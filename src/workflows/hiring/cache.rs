use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::domain::{AgentKind, AgentResponse};

struct CacheSlot {
    response: AgentResponse,
    stored_at: Instant,
}

/// Read-through cache of agent outputs keyed by a fingerprint of the agent
/// name plus the exact input payload. A hit short-circuits the gateway call;
/// the orchestrator still appends a cache-sourced AgentRun for auditability.
pub struct AgentOutputCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, CacheSlot>>,
}

impl AgentOutputCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_seconds),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn fingerprint(agent: AgentKind, payload: &Value) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(agent.label().as_bytes());
        hasher.update(payload.to_string().as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    pub fn get(&self, agent: AgentKind, payload: &Value) -> Option<AgentResponse> {
        let key = Self::fingerprint(agent, payload);
        let mut slots = self.slots.lock().expect("cache mutex poisoned");
        match slots.get(&key) {
            Some(slot) if slot.stored_at.elapsed() <= self.ttl => Some(slot.response.clone()),
            Some(_) => {
                slots.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, agent: AgentKind, payload: &Value, response: AgentResponse) {
        let key = Self::fingerprint(agent, payload);
        self.slots.lock().expect("cache mutex poisoned").insert(
            key,
            CacheSlot {
                response,
                stored_at: Instant::now(),
            },
        );
    }
}
