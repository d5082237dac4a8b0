//! The engine's error taxonomy.
//!
//! Every error message begins with the name of the first pipeline step that
//! failed. Diagnostic UIs parse these prefixes to route failures, so the
//! prefix strings are frozen.

use cove_enclave::MeasurementError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Fetching or parsing the latest release digest failed.
    #[error("fetchDigest: {0:#}")]
    FetchDigest(anyhow::Error),

    /// Transparency-log provenance for the release failed to verify.
    #[error("verifyCode: {0:#}")]
    VerifyCode(anyhow::Error),

    /// The live enclave attestation (evidence, vendor chain, signatures, or
    /// key binding) failed to verify.
    #[error("verifyEnclave: {0:#}")]
    VerifyEnclave(anyhow::Error),

    /// The platform hardware measurements failed to fetch or validate.
    #[error("verifyHardware: {0:#}")]
    VerifyHardware(anyhow::Error),

    /// The attested TLS public key fingerprint is malformed or missing.
    #[error("validateTLS: {0:#}")]
    ValidateTls(anyhow::Error),

    /// The code measurement and the enclave's runtime measurement disagree.
    #[error("measurements: {0}")]
    Measurements(#[from] MeasurementError),

    /// Anything that doesn't map to a pipeline step.
    #[error("otherError: {0:#}")]
    Other(anyhow::Error),
}

impl EngineError {
    /// The step prefix, without the trailing colon.
    pub fn step_name(&self) -> &'static str {
        match self {
            Self::FetchDigest(_) => "fetchDigest",
            Self::VerifyCode(_) => "verifyCode",
            Self::VerifyEnclave(_) => "verifyEnclave",
            Self::VerifyHardware(_) => "verifyHardware",
            Self::ValidateTls(_) => "validateTLS",
            Self::Measurements(_) => "measurements",
            Self::Other(_) => "otherError",
        }
    }
}
