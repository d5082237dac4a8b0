//! The authoritative result of a successful verification.

use cove_enclave::{Measurement, ReleaseDigest};
use serde::{Deserialize, Serialize};

use crate::hardware::HardwareMeasurement;

/// Everything the transport layer is allowed to trust about the remote
/// enclave. Produced atomically by [`AttestationEngine::verify`]; immutable
/// afterward.
///
/// Invariant: at least one of `tls_public_key_fingerprint` and
/// `hpke_public_key` is present. The engine refuses to return a record with
/// neither.
///
/// [`AttestationEngine::verify`]: crate::AttestationEngine::verify
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundTruth {
    /// The digest of the latest published release of the config repo.
    pub release_digest: ReleaseDigest,

    /// The measurement the transparency log says this release should have.
    pub code_measurement: Measurement,

    /// The measurement the live enclave actually attested to.
    pub enclave_measurement: Measurement,

    /// SHA-256 of the enclave leaf certificate's DER SubjectPublicKeyInfo.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_public_key_fingerprint: Option<cove_sha256::Hash>,

    /// The enclave's HPKE public key, when the enclave supports encrypted
    /// request bodies.
    #[serde(
        default,
        with = "cove_hex::serde_hex::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub hpke_public_key: Option<Vec<u8>>,

    /// TDX platform hardware measurements, when the enclave runs on TDX.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_measurement: Option<HardwareMeasurement>,

    /// Stable fingerprint of `code_measurement`.
    pub code_fingerprint: cove_sha256::Hash,

    /// Stable fingerprint of `enclave_measurement`.
    pub enclave_fingerprint: cove_sha256::Hash,

    /// The host the attestation was performed against.
    pub selected_router_endpoint: String,
}
