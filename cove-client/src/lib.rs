//! Verified client for confidential-compute inference enclaves.
//!
//! Before any request leaves the process, the client proves that (a) the
//! server code matches a published, signed release, (b) the server is
//! actually running inside a genuine enclave whose runtime measurement
//! matches that code, and (c) the connection terminates at exactly that
//! enclave. Requests then flow through a transport that binds each body to
//! the proven enclave key: HPKE-encrypted bodies when the enclave attested
//! an HPKE key, pinned-leaf TLS otherwise.
//!
//! ```no_run
//! use cove_client::{ClientConfig, SecureClient};
//!
//! # async fn demo() -> Result<(), cove_client::ClientError> {
//! let client = SecureClient::new(ClientConfig {
//!     enclave_url: Some("https://e.example/".to_owned()),
//!     config_repo: Some("cove-sh/confidential-inference-proxy".to_owned()),
//!     ..Default::default()
//! })?;
//!
//! client.ready().await?;
//! let response = client.fetch("/v1/models", None).await?;
//! println!("{}", response.text().await?);
//!
//! let document = client.verification_document()?;
//! assert!(document.security_verified);
//! # Ok(())
//! # }
//! ```
//!
//! A failed attestation is fatal for the request that triggered it; no
//! partially-verified client is ever usable.

mod cancel;
mod client;
mod ehbp;
mod error;
pub mod logger;
mod ohttp_keys;
mod pinned;
mod request;
mod response;
mod steps;
mod unverified;
mod verifier;

pub use cancel::CancelSignal;
pub use client::{
    ClientConfig, DEFAULT_BASE_URL, DEFAULT_CONFIG_REPO, RuntimeEnv,
    SecureClient,
};
pub use ehbp::{
    EhbpTransport, HEADER_CLIENT_PUBLIC_KEY, HEADER_ENCAPSULATED_KEY,
    HEADER_FALLBACK, WELL_KNOWN_HPKE_KEYS,
};
pub use error::ClientError;
pub use pinned::PinnedTransport;
pub use request::{PreparedRequest, RequestInit, RequestInput};
pub use response::Response;
pub use steps::{StepDocument, StepState, StepStatus};
pub use unverified::{UnverifiedClient, WELL_KNOWN_ROUTERS};
pub use verifier::{
    AttestationResponse, VerificationDocument, Verifier, VerifierConfig,
};

// Re-export the attestation layer so embedders don't need to depend on it
// directly.
pub use cove_attest::{
    EngineError, GroundTruth, HardwareMeasurement, suppress_engine_logs,
};
pub use cove_enclave::{Measurement, MeasurementError, Platform};
