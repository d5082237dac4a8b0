//! The verifier façade: owns the engine lifecycle, the step document, and
//! the last ground truth.

use std::sync::{Mutex, OnceLock};

use cove_attest::{
    AttestationEngine, Endpoints, GroundTruth, SnpRootPolicy,
};
use cove_enclave::Measurement;
use serde::Serialize;

use crate::{error::ClientError, steps::StepDocument};

/// Everything a caller can inspect about the last verification: the ground
/// truth (on success), the per-step states, and the inputs that were
/// verified. Callers always receive clones; the stored document is created
/// exactly once per verifier instance and immutable afterward.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDocument {
    pub config_repo: String,
    pub enclave_host: String,
    pub security_verified: bool,
    pub steps: StepDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<GroundTruth>,
}

/// The subset of ground truth the transport selector needs.
#[derive(Clone, Debug)]
pub struct AttestationResponse {
    pub tls_public_key_fingerprint: Option<cove_sha256::Hash>,
    pub hpke_public_key: Option<Vec<u8>>,
    pub measurement: Measurement,
}

#[derive(Clone, Debug)]
pub struct VerifierConfig {
    /// The URL whose hostname is the enclave host. Mandatory.
    pub server_url: String,
    /// `owner/name` of the release source.
    pub config_repo: String,
}

/// Thin wrapper around the attestation engine which records outcomes.
///
/// Each `verify()` call runs a fresh engine instance; results are not
/// memoized, but the verification document keeps the first outcome for
/// callers to inspect.
pub struct Verifier {
    enclave_host: String,
    config_repo: String,
    endpoints: Endpoints,
    snp_policy: Option<SnpRootPolicy>,
    document: OnceLock<VerificationDocument>,
    last_ground_truth: Mutex<Option<GroundTruth>>,
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Result<Self, ClientError> {
        let enclave_host = host_of(&config.server_url)?;
        Ok(Self {
            enclave_host,
            config_repo: config.config_repo,
            endpoints: Endpoints::default(),
            snp_policy: None,
            document: OnceLock::new(),
            last_ground_truth: Mutex::new(None),
        })
    }

    /// Override the engine's outbound endpoints. Testing only.
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Override the engine's trusted SEV-SNP roots. Testing only.
    pub fn with_snp_policy(mut self, snp_policy: SnpRootPolicy) -> Self {
        self.snp_policy = Some(snp_policy);
        self
    }

    pub fn enclave_host(&self) -> &str {
        &self.enclave_host
    }

    /// Run the attestation pipeline and record the outcome.
    pub async fn verify(&self) -> Result<AttestationResponse, ClientError> {
        let mut engine =
            AttestationEngine::with_endpoints(self.endpoints.clone());
        if let Some(snp_policy) = &self.snp_policy {
            engine = engine.with_snp_policy(snp_policy.clone());
        }

        let result = engine.verify(&self.enclave_host, &self.config_repo).await;

        match result {
            Ok(ground_truth) => {
                let _ = self.document.set(VerificationDocument {
                    config_repo: self.config_repo.clone(),
                    enclave_host: self.enclave_host.clone(),
                    security_verified: true,
                    steps: StepDocument::all_success(),
                    ground_truth: Some(ground_truth.clone()),
                });

                let response = AttestationResponse {
                    tls_public_key_fingerprint: ground_truth
                        .tls_public_key_fingerprint,
                    hpke_public_key: ground_truth.hpke_public_key.clone(),
                    measurement: ground_truth.enclave_measurement.clone(),
                };
                *self.last_ground_truth.lock().unwrap() = Some(ground_truth);
                Ok(response)
            }
            Err(err) => {
                let _ = self.document.set(VerificationDocument {
                    config_repo: self.config_repo.clone(),
                    enclave_host: self.enclave_host.clone(),
                    security_verified: false,
                    steps: StepDocument::from_error(&err),
                    ground_truth: None,
                });
                // A failed verification invalidates any previous result.
                *self.last_ground_truth.lock().unwrap() = None;
                Err(ClientError::Attestation(err))
            }
        }
    }

    /// The document recorded by the first completed `verify()`, if any.
    pub fn verification_document(&self) -> Option<VerificationDocument> {
        self.document.get().cloned()
    }

    pub(crate) fn last_ground_truth(&self) -> Option<GroundTruth> {
        self.last_ground_truth.lock().unwrap().clone()
    }
}

fn host_of(server_url: &str) -> Result<String, ClientError> {
    let url = reqwest::Url::parse(server_url).map_err(|err| {
        ClientError::Config(format!("serverURL failed to parse: {err}"))
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| ClientError::Config("serverURL has no host".into()))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}
