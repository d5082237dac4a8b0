//! The attestation engine: proves that a remote enclave is running exactly
//! the code a published release says it should, and extracts the transport
//! keys the enclave attested to.
//!
//! This crate is a sealed module with a single entry point,
//! [`AttestationEngine::verify`]. Callers get back a [`GroundTruth`] or an
//! [`EngineError`] whose `Display` names the first pipeline step that failed;
//! nothing in here is meant to be driven piecemeal from outside.

use std::sync::{
    Once,
    atomic::{AtomicBool, Ordering},
};

mod doc;
mod engine;
mod error;
mod ground_truth;
mod hardware;
mod provenance;
mod release;
mod snp;
mod tdx;

pub use engine::{AttestationEngine, Endpoints};
pub use error::EngineError;
pub use ground_truth::GroundTruth;
pub use hardware::HardwareMeasurement;
pub use snp::SnpRootPolicy;

/// The tracing target all engine logs are emitted under.
pub const ENGINE_LOG_TARGET: &str = "cove_attest::engine";

/// Engine logs are suppressed by default; the engine is usually driven from
/// interactive clients whose stdout belongs to the application.
/// `COVE_ATTEST_LOG=1` or [`suppress_engine_logs`]`(false)` re-enables them.
static ENGINE_LOGS_SUPPRESSED: AtomicBool = AtomicBool::new(true);

static ENGINE_INIT: Once = Once::new();

/// Toggle engine log suppression at runtime.
pub fn suppress_engine_logs(suppress: bool) {
    ENGINE_LOGS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

pub(crate) fn engine_logs_enabled() -> bool {
    !ENGINE_LOGS_SUPPRESSED.load(Ordering::Relaxed)
}

/// One-shot process-wide initialization of the engine's crypto runtime.
///
/// Idempotent; concurrent initializers serialize on the latch. Called
/// automatically on the first [`AttestationEngine::verify`] unless
/// `COVE_ATTEST_NO_AUTO_INIT=1` is set, in which case the embedding
/// application must call it explicitly before verifying.
pub fn init() {
    ENGINE_INIT.call_once(|| {
        // Make the rustls process-default provider agree with the one our
        // TLS configs are built from; harmless if another component won the
        // race to install one.
        let provider = (**cove_tls::COVE_CRYPTO_PROVIDER).clone();
        let _ = provider.install_default();

        if std::env::var("COVE_ATTEST_LOG").as_deref() == Ok("1") {
            suppress_engine_logs(false);
        }
    });
}

pub(crate) fn ensure_auto_init() {
    if std::env::var("COVE_ATTEST_NO_AUTO_INIT").as_deref() == Ok("1") {
        return;
    }
    init();
}
