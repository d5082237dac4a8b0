//! The transport selector: verify first, then route requests through the
//! encrypted or pinned transport the ground truth allows.

use std::sync::Arc;

use cove_attest::{Endpoints, GroundTruth, SnpRootPolicy};
use reqwest::Url;

use crate::{
    ehbp::EhbpTransport,
    error::ClientError,
    pinned::PinnedTransport,
    request::{self, RequestInit, RequestInput},
    response::Response,
    verifier::{VerificationDocument, Verifier, VerifierConfig},
};

/// Default application API base.
pub const DEFAULT_BASE_URL: &str = "https://inference.cove.sh/v1/";

/// Default release source.
pub const DEFAULT_CONFIG_REPO: &str = "cove-sh/confidential-inference-proxy";

/// Caller-facing configuration. Everything is optional; URL derivation
/// fills the gaps:
///
/// + `base_url` absent, `enclave_url` present: `base_url` is the enclave
///   origin + `/v1/`.
/// + `enclave_url` absent, `base_url` present: `enclave_url` is the base
///   origin.
/// + both absent: the vendor defaults.
#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub enclave_url: Option<String>,
    pub config_repo: Option<String>,
    /// Opaque bearer credential, attached as `Authorization: Bearer …`
    /// unless the caller set one explicitly.
    pub api_key: Option<String>,
}

#[derive(Debug)]
pub(crate) struct ResolvedConfig {
    pub base_url: Url,
    pub enclave_url: Url,
    pub config_repo: String,
    pub api_key: Option<String>,
}

pub(crate) fn resolve_config(
    config: ClientConfig,
) -> Result<ResolvedConfig, ClientError> {
    let parse = |name: &str, value: &str| {
        Url::parse(value).map_err(|err| {
            ClientError::Config(format!("{name} failed to parse: {err}"))
        })
    };

    let (base_url, enclave_url) = match (config.base_url, config.enclave_url)
    {
        (Some(base), Some(enclave)) =>
            (parse("baseURL", &base)?, parse("enclaveURL", &enclave)?),
        (None, Some(enclave)) => {
            let enclave = parse("enclaveURL", &enclave)?;
            let base = origin_of(&enclave)?.join("v1/").map_err(|err| {
                ClientError::Config(format!("baseURL derivation: {err}"))
            })?;
            (base, enclave)
        }
        (Some(base), None) => {
            let base = parse("baseURL", &base)?;
            let enclave = origin_of(&base)?;
            (base, enclave)
        }
        (None, None) => {
            let base = parse("baseURL", DEFAULT_BASE_URL)?;
            let enclave = origin_of(&base)?;
            (base, enclave)
        }
    };

    Ok(ResolvedConfig {
        base_url,
        enclave_url,
        config_repo: config
            .config_repo
            .unwrap_or_else(|| DEFAULT_CONFIG_REPO.to_owned()),
        api_key: config.api_key,
    })
}

fn origin_of(url: &Url) -> Result<Url, ClientError> {
    let origin = url.origin().ascii_serialization();
    Url::parse(&format!("{origin}/")).map_err(|err| {
        ClientError::Config(format!("URL '{url}' has no usable origin: {err}"))
    })
}

/// Whether we're running inside a real browser. A "real browser" exposes a
/// browser-like window + document + user agent without a server-runtime
/// identity marker; when in doubt we classify as not-browser, which is the
/// safe direction for the TLS fallback path. On native targets the answer
/// is compile-time false; the probe stays injectable so tests (and a wasm
/// build) can exercise the browser-refusal path.
#[derive(Clone, Copy, Debug)]
pub struct RuntimeEnv {
    pub is_real_browser: bool,
}

impl RuntimeEnv {
    pub fn detect() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "wasm32")] {
                Self { is_real_browser: true }
            } else {
                Self { is_real_browser: false }
            }
        }
    }
}

enum Transport {
    Ehbp(EhbpTransport),
    Pinned(PinnedTransport),
}

/// The verified client: a `fetch`-shaped callable whose every request is
/// bound to a proven enclave key.
///
/// The first request (or an explicit [`ready`](Self::ready)) runs the full
/// attestation pipeline; concurrent first requests share a single
/// verification. A failed attestation is fatal for this instance's
/// in-flight request, but a later call retries from the top.
pub struct SecureClient {
    resolved: ResolvedConfig,
    verifier: Verifier,
    runtime: RuntimeEnv,
    transport: tokio::sync::Mutex<Option<Arc<Transport>>>,
}

impl SecureClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let resolved = resolve_config(config)?;
        let verifier = Verifier::new(VerifierConfig {
            server_url: resolved.enclave_url.to_string(),
            config_repo: resolved.config_repo.clone(),
        })?;

        Ok(Self {
            resolved,
            verifier,
            runtime: RuntimeEnv::detect(),
            transport: tokio::sync::Mutex::new(None),
        })
    }

    /// Override the engine's outbound endpoints. Testing only.
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.verifier = self.verifier.with_endpoints(endpoints);
        self
    }

    /// Override the engine's trusted SEV-SNP roots. Testing only.
    pub fn with_snp_policy(mut self, snp_policy: SnpRootPolicy) -> Self {
        self.verifier = self.verifier.with_snp_policy(snp_policy);
        self
    }

    /// Override browser detection. Testing only.
    pub fn with_runtime_env(mut self, runtime: RuntimeEnv) -> Self {
        self.runtime = runtime;
        self
    }

    /// Verify the enclave and construct the transport. Idempotent;
    /// concurrent callers share one verification.
    pub async fn ready(&self) -> Result<(), ClientError> {
        self.transport().await.map(|_| ())
    }

    /// The `fetch`-shaped entry point. Calling it before [`ready`] runs
    /// [`ready`] internally.
    ///
    /// [`ready`]: Self::ready
    pub async fn fetch(
        &self,
        input: impl Into<RequestInput>,
        init: Option<RequestInit>,
    ) -> Result<Response, ClientError> {
        let input = input.into();

        // The caller's signal must be able to abort the verification phase
        // too, not just the request itself.
        let signal = request::peek_signal(&input, init.as_ref());
        let transport = match &signal {
            Some(signal) => {
                tokio::select! {
                    biased;
                    () = signal.cancelled() =>
                        return Err(ClientError::Cancelled),
                    transport = self.transport() => transport?,
                }
            }
            None => self.transport().await?,
        };

        match &*transport {
            Transport::Ehbp(transport) => transport.fetch(input, init).await,
            Transport::Pinned(transport) =>
                transport.fetch(input, init).await,
        }
    }

    /// The verification document, available after the first completed
    /// verification (successful or not).
    pub fn verification_document(
        &self,
    ) -> Result<VerificationDocument, ClientError> {
        self.verifier
            .verification_document()
            .ok_or(ClientError::NotReady)
    }

    async fn transport(&self) -> Result<Arc<Transport>, ClientError> {
        let mut slot = self.transport.lock().await;
        if let Some(transport) = slot.as_ref() {
            return Ok(transport.clone());
        }

        // Holding the lock across the verification is what makes `ready()`
        // single-flight; a cancelled waiter leaves the slot empty so the
        // next call retries from the top.
        self.verifier.verify().await?;
        let ground_truth = self
            .verifier
            .last_ground_truth()
            .expect("verify() succeeded but stored no ground truth");

        let transport = Arc::new(self.select_transport(&ground_truth)?);
        *slot = Some(transport.clone());
        Ok(transport)
    }

    /// The selection rule: HPKE when the enclave attested an HPKE key,
    /// pinned TLS outside browsers otherwise.
    fn select_transport(
        &self,
        ground_truth: &GroundTruth,
    ) -> Result<Transport, ClientError> {
        if let Some(hpke_key) = &ground_truth.hpke_public_key {
            let transport = EhbpTransport::new(
                self.resolved.base_url.clone(),
                Some(hpke_key.clone()),
                Some(self.resolved.enclave_url.clone()),
                self.resolved.api_key.clone(),
            )?;
            return Ok(Transport::Ehbp(transport));
        }

        if !self.runtime.is_real_browser {
            if let Some(fingerprint) =
                ground_truth.tls_public_key_fingerprint
            {
                let transport = PinnedTransport::new(
                    self.resolved.base_url.clone(),
                    fingerprint,
                    self.resolved.api_key.clone(),
                )?;
                return Ok(Transport::Pinned(transport));
            }
        }

        Err(ClientError::BrowserWithoutHpke)
    }
}
