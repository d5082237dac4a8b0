//! Client-level error taxonomy.
//!
//! Attestation-step errors pass through [`EngineError`] with their step
//! prefixes intact; the remaining variants cover configuration, key pins,
//! transport policy, and upstream transport failures. Several `Display`
//! strings are frozen because existing UIs match on them.

use cove_attest::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Missing required field, unparseable URL, bad scheme.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An attestation pipeline step failed; the message keeps its step
    /// prefix (`fetchDigest:`, `verifyCode:`, …).
    #[error(transparent)]
    Attestation(#[from] EngineError),

    /// The HPKE key served at the discovery endpoint disagrees with the
    /// attested key.
    #[error("HPKE public key mismatch")]
    HpkeKeyMismatch,

    /// The pinned-TLS leaf fingerprint disagrees with the attested one.
    #[error("Certificate fingerprint mismatch")]
    CertificateFingerprintMismatch,

    /// A plaintext request on a pinned path.
    #[error("HTTP connections are not allowed")]
    PlaintextHttp,

    /// The enclave offers no HPKE key and the runtime cannot pin TLS.
    #[error(
        "HPKE public key not available and TLS-only verification is not \
         supported in browsers"
    )]
    BrowserWithoutHpke,

    /// [`UnverifiedClient`](crate::UnverifiedClient) has no document.
    #[error(
        "Verification document unavailable: this version of the client is \
         unverified"
    )]
    UnverifiedDocument,

    /// [`SecureClient::verification_document`] before any verification.
    ///
    /// [`SecureClient::verification_document`]:
    ///     crate::SecureClient::verification_document
    #[error("verification has not run yet; call ready() first")]
    NotReady,

    /// The caller's cancellation signal fired.
    #[error("request cancelled")]
    Cancelled,

    /// Fetching or parsing the server HPKE key configuration failed.
    #[error("HPKE key discovery failed: {0:#}")]
    KeyDiscovery(anyhow::Error),

    /// The HPKE runtime itself failed (encap, seal, open).
    #[error("HPKE error: {0}")]
    Hpke(hpke::HpkeError),

    /// Surfaced verbatim from the underlying HTTP/TLS client.
    #[error(transparent)]
    Upstream(anyhow::Error),
}

impl ClientError {
    pub(crate) fn upstream(err: reqwest::Error) -> Self {
        Self::Upstream(anyhow::Error::new(err))
    }
}
