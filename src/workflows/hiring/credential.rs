use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{
    ApplicationId, ApplicationStatus, CandidateId, PipelineStage, StagePointer,
};

pub const SIGNATURE_SCHEME: &str = "ed25519-blake3-v1";

/// Cumulative pipeline progress for one application. Serialized canonically
/// (struct field order plus sorted stage-result keys) before signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialDocument {
    pub application_id: ApplicationId,
    pub candidate_id: CandidateId,
    pub current_stage: StagePointer,
    pub stages_completed: Vec<PipelineStage>,
    pub status: ApplicationStatus,
    pub test_required: bool,
    pub stage_results: BTreeMap<String, Value>,
    pub issued_at: DateTime<Utc>,
}

impl CredentialDocument {
    /// Empty document synthesized before the first stage completes.
    pub fn genesis(application_id: ApplicationId, candidate_id: CandidateId) -> Self {
        Self {
            application_id,
            candidate_id,
            current_stage: StagePointer::Next(PipelineStage::CompanyVerification),
            stages_completed: Vec::new(),
            status: ApplicationStatus::Pending,
            test_required: false,
            stage_results: BTreeMap::new(),
            issued_at: Utc::now(),
        }
    }

    /// Successor document with `stage` appended. `stages_completed` only ever
    /// grows; the caller supplies the new pointer and status.
    pub fn advanced(
        &self,
        stage: PipelineStage,
        pointer: StagePointer,
        status: ApplicationStatus,
        test_required: bool,
        stage_result: Value,
    ) -> Self {
        let mut next = self.clone();
        next.stages_completed.push(stage);
        next.current_stage = pointer;
        next.status = status;
        next.test_required = test_required;
        next.stage_results
            .insert(stage.label().to_string(), stage_result);
        next.issued_at = Utc::now();
        next
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Signed, versioned credential row. Rows are append-only; the latest by
/// `document.issued_at` is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedCredential {
    pub document: CredentialDocument,
    pub signer_public_key: String,
    pub signature: String,
    pub signature_scheme: String,
}

impl SignedCredential {
    /// Definite pass/fail verification against the embedded public key.
    /// Malformed key or signature material verifies as `false`, never panics.
    pub fn verify(&self) -> bool {
        if self.signature_scheme != SIGNATURE_SCHEME {
            return false;
        }

        let public_key_bytes = match hex::decode(&self.signer_public_key) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let public_key_array: [u8; 32] = match public_key_bytes.try_into() {
            Ok(arr) => arr,
            Err(_) => return false,
        };
        let verifying_key = match VerifyingKey::from_bytes(&public_key_array) {
            Ok(key) => key,
            Err(_) => return false,
        };

        let signature_bytes = match hex::decode(&self.signature) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let signature = match Signature::from_slice(&signature_bytes) {
            Ok(sig) => sig,
            Err(_) => return false,
        };

        let payload = match signing_payload(&self.document) {
            Ok(payload) => payload,
            Err(_) => return false,
        };

        verifying_key.verify(&payload, &signature).is_ok()
    }

    /// Consumer-side access that refuses to read an unverifiable document.
    pub fn verified_document(&self) -> Result<&CredentialDocument, SignatureError> {
        if self.verify() {
            Ok(&self.document)
        } else {
            Err(SignatureError {
                application_id: self.document.application_id.clone(),
            })
        }
    }
}

/// Hard trust violation: a credential's signature no longer matches its
/// document. Must halt consumption, never be silently ignored.
#[derive(Debug, Clone, thiserror::Error)]
#[error("credential signature verification failed for application {application_id}")]
pub struct SignatureError {
    pub application_id: ApplicationId,
}

fn signing_payload(document: &CredentialDocument) -> Result<Vec<u8>, serde_json::Error> {
    let digest = blake3::hash(&document.canonical_bytes()?);
    let mut payload = Vec::with_capacity(32 + SIGNATURE_SCHEME.len());
    payload.extend_from_slice(digest.as_bytes());
    payload.extend_from_slice(SIGNATURE_SCHEME.as_bytes());
    Ok(payload)
}

/// Process-wide issuing key. The private half is provided at startup and never
/// logged; the hex public half travels inside every issued credential.
pub struct CredentialSigner {
    signing_key: SigningKey,
}

impl CredentialSigner {
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, SigningKeyError> {
        let bytes = hex::decode(seed_hex.trim()).map_err(|_| SigningKeyError::InvalidSeed)?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| SigningKeyError::InvalidSeed)?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Fresh random key for development and test environments.
    pub fn ephemeral() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, document: CredentialDocument) -> Result<SignedCredential, SigningKeyError> {
        let payload = signing_payload(&document).map_err(SigningKeyError::Serialize)?;
        let signature = self.signing_key.sign(&payload);
        Ok(SignedCredential {
            document,
            signer_public_key: self.public_key_hex(),
            signature: hex::encode(signature.to_bytes()),
            signature_scheme: SIGNATURE_SCHEME.to_string(),
        })
    }
}

/// Errors establishing or using the issuing key.
#[derive(Debug, thiserror::Error)]
pub enum SigningKeyError {
    #[error("signing key seed must be 32 bytes of hex")]
    InvalidSeed,
    #[error("credential document could not be serialized for signing: {0}")]
    Serialize(#[source] serde_json::Error),
}
