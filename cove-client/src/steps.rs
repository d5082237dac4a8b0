//! Per-step verification state, for progress UIs and failure diagnosis.

use cove_attest::EngineError;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

/// One verification step's state.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepState {
    fn success() -> Self {
        Self {
            status: StepStatus::Success,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            status: StepStatus::Failed,
            error: Some(error),
        }
    }
}

/// The full step document. Serializes with the legacy step names so
/// existing progress UIs can render it unchanged.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDocument {
    pub fetch_digest: StepState,
    pub verify_code: StepState,
    pub verify_enclave: StepState,
    pub compare_measurements: StepState,
    pub verify_hardware: StepState,
    #[serde(rename = "validateTLS")]
    pub validate_tls: StepState,
    pub other_error: StepState,
}

/// Pipeline order. `compare_measurements` runs last even though UIs list it
/// fourth; `other_error` is a catch-all slot, not a real step.
const PIPELINE: &[fn(&mut StepDocument) -> &mut StepState] = &[
    |doc| &mut doc.fetch_digest,
    |doc| &mut doc.verify_code,
    |doc| &mut doc.verify_enclave,
    |doc| &mut doc.verify_hardware,
    |doc| &mut doc.validate_tls,
    |doc| &mut doc.compare_measurements,
    |doc| &mut doc.other_error,
];

impl StepDocument {
    /// The document for a fully successful verification. `other_error`
    /// stays pending; it only ever reports failures.
    pub fn all_success() -> Self {
        let mut doc = Self::default();
        for step in &PIPELINE[..PIPELINE.len() - 1] {
            *step(&mut doc) = StepState::success();
        }
        doc
    }

    /// The document for a failed verification: steps before the failing one
    /// are success, the failing one carries the error, later steps stay
    /// pending.
    pub fn from_error(error: &EngineError) -> Self {
        let failed_idx = match error {
            EngineError::FetchDigest(_) => 0,
            EngineError::VerifyCode(_) => 1,
            EngineError::VerifyEnclave(_) => 2,
            EngineError::VerifyHardware(_) => 3,
            EngineError::ValidateTls(_) => 4,
            EngineError::Measurements(_) => 5,
            EngineError::Other(_) => 6,
        };

        let mut doc = Self::default();
        for step in &PIPELINE[..failed_idx] {
            *step(&mut doc) = StepState::success();
        }
        *PIPELINE[failed_idx](&mut doc) = StepState::failed(error.to_string());
        doc
    }
}
