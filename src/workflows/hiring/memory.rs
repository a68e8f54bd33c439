use std::collections::HashMap;
use std::sync::Mutex;

use super::credential::SignedCredential;
use super::domain::{AgentRunRecord, ApplicationId, ApplicationRecord};
use super::repository::{
    AgentRunRepository, ApplicationRepository, AuditEntry, AuditTrail, CredentialRepository,
    RepositoryError,
};

/// In-process store backing the server, the demo, and the test suite. The
/// durable engine behind these traits is deliberately out of scope; this
/// implementation keeps the same append-only discipline the traits demand.
#[derive(Default)]
pub struct InMemoryStore {
    applications: Mutex<HashMap<ApplicationId, ApplicationRecord>>,
    runs: Mutex<Vec<AgentRunRecord>>,
    credentials: Mutex<Vec<SignedCredential>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApplicationRepository for InMemoryStore {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, RepositoryError> {
        let mut guard = self.applications.lock().expect("application mutex poisoned");
        if guard.contains_key(&record.application_id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.application_id.clone(), record.clone());
        Ok(record)
    }

    fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, RepositoryError> {
        let guard = self.applications.lock().expect("application mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn update(&self, record: ApplicationRecord) -> Result<(), RepositoryError> {
        let mut guard = self.applications.lock().expect("application mutex poisoned");
        if !guard.contains_key(&record.application_id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(record.application_id.clone(), record);
        Ok(())
    }

    fn mark_bias_eligible(&self, id: &ApplicationId) -> Result<(), RepositoryError> {
        let mut guard = self.applications.lock().expect("application mutex poisoned");
        match guard.get_mut(id) {
            Some(record) => {
                record.bias_eligible = true;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn claim_bias_eligible(
        &self,
        min_batch: usize,
    ) -> Result<Vec<ApplicationId>, RepositoryError> {
        // Single critical section: claim-and-clear so concurrent batch runs
        // can never receive overlapping ids.
        let mut guard = self.applications.lock().expect("application mutex poisoned");
        let eligible: Vec<ApplicationId> = guard
            .values()
            .filter(|record| record.bias_eligible)
            .map(|record| record.application_id.clone())
            .collect();

        if eligible.len() < min_batch {
            return Ok(Vec::new());
        }

        for id in &eligible {
            if let Some(record) = guard.get_mut(id) {
                record.bias_eligible = false;
            }
        }
        Ok(eligible)
    }
}

impl AgentRunRepository for InMemoryStore {
    fn record_run(&self, run: AgentRunRecord) -> Result<(), RepositoryError> {
        self.runs.lock().expect("run mutex poisoned").push(run);
        Ok(())
    }

    fn runs_for(&self, id: &ApplicationId) -> Result<Vec<AgentRunRecord>, RepositoryError> {
        let guard = self.runs.lock().expect("run mutex poisoned");
        Ok(guard
            .iter()
            .filter(|run| &run.application_id == id)
            .cloned()
            .collect())
    }
}

impl CredentialRepository for InMemoryStore {
    fn append_credential(&self, credential: SignedCredential) -> Result<(), RepositoryError> {
        self.credentials
            .lock()
            .expect("credential mutex poisoned")
            .push(credential);
        Ok(())
    }

    fn latest_credential(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<SignedCredential>, RepositoryError> {
        let guard = self.credentials.lock().expect("credential mutex poisoned");
        Ok(guard
            .iter()
            .filter(|credential| &credential.document.application_id == id)
            .max_by_key(|credential| credential.document.issued_at)
            .cloned())
    }

    fn credential_history(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<SignedCredential>, RepositoryError> {
        let guard = self.credentials.lock().expect("credential mutex poisoned");
        Ok(guard
            .iter()
            .filter(|credential| &credential.document.application_id == id)
            .cloned()
            .collect())
    }
}

impl AuditTrail for InMemoryStore {
    fn record(&self, entry: AuditEntry) -> Result<(), RepositoryError> {
        self.audit.lock().expect("audit mutex poisoned").push(entry);
        Ok(())
    }

    fn scan(&self, id: Option<&ApplicationId>) -> Result<Vec<AuditEntry>, RepositoryError> {
        let guard = self.audit.lock().expect("audit mutex poisoned");
        Ok(guard
            .iter()
            .filter(|entry| match id {
                Some(wanted) => entry.application_id.as_ref() == Some(wanted),
                None => true,
            })
            .cloned()
            .collect())
    }
}
