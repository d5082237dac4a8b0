//! The engine's single entry point: resolve, cross-check, and return ground
//! truth for one enclave host.

use anyhow::{Context, ensure, format_err};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    ENGINE_LOG_TARGET, doc,
    error::EngineError,
    ground_truth::GroundTruth,
    hardware::{HardwareMeasurement, HardwareRegistry},
    provenance,
    release,
    snp::SnpRootPolicy,
};

/// Default GitHub proxy used to resolve releases and provenance bundles.
pub const DEFAULT_GITHUB_PROXY: &str = "https://github-proxy.cove.sh";

/// Default registry of known-good TDX hardware platforms.
pub const DEFAULT_HARDWARE_REGISTRY: &str =
    "https://cdn.cove.sh/hardware/tdx-platforms.json";

/// Where a live enclave serves its attestation document.
const ATTESTATION_PATH: &str = "/.well-known/enclave-attestation";

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

const ENGINE_USER_AGENT: &str =
    concat!("cove-attest/", env!("CARGO_PKG_VERSION"));

/// Where the engine issues its outbound requests.
#[derive(Clone, Debug)]
pub struct Endpoints {
    pub github_proxy_base: String,
    pub hardware_registry_url: String,
    /// Permit plain-HTTP endpoints. Localhost testing only; never set this
    /// in production.
    pub allow_insecure: bool,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            github_proxy_base: DEFAULT_GITHUB_PROXY.to_owned(),
            hardware_registry_url: DEFAULT_HARDWARE_REGISTRY.to_owned(),
            allow_insecure: false,
        }
    }
}

/// The sealed attestation engine.
///
/// One instance performs exactly one [`verify`](Self::verify): the call
/// consumes the engine, so keys and certs can never be reused across
/// verifications. The engine holds no state beyond its endpoints; it is
/// deterministic given its inputs, up to network variability.
pub struct AttestationEngine {
    endpoints: Endpoints,
    snp_policy: SnpRootPolicy,
    http: reqwest::Client,
}

impl AttestationEngine {
    pub fn new() -> Self {
        Self::with_endpoints(Endpoints::default())
    }

    pub fn with_endpoints(endpoints: Endpoints) -> Self {
        let http = build_http_client(endpoints.allow_insecure);
        Self {
            endpoints,
            snp_policy: SnpRootPolicy::amd_kds(),
            http,
        }
    }

    /// Override the trusted SEV-SNP roots. Useful in tests.
    pub fn with_snp_policy(mut self, snp_policy: SnpRootPolicy) -> Self {
        self.snp_policy = snp_policy;
        self
    }

    /// Run the full verification pipeline against `enclave_host` for the
    /// release published by `config_repo` (`"owner/name"`).
    ///
    /// Atomic: either every step passed and the returned [`GroundTruth`] is
    /// complete, or the error names the first step that failed.
    pub async fn verify(
        self,
        enclave_host: &str,
        config_repo: &str,
    ) -> Result<GroundTruth, EngineError> {
        crate::ensure_auto_init();

        let repo =
            RepoPath::parse(config_repo).map_err(EngineError::FetchDigest)?;
        validate_enclave_host(enclave_host).map_err(EngineError::Other)?;

        // 1. fetchDigest
        let release_digest = self
            .fetch_digest(&repo)
            .await
            .map_err(EngineError::FetchDigest)?;
        if crate::engine_logs_enabled() {
            debug!(
                target: ENGINE_LOG_TARGET,
                %release_digest,
                "resolved latest release digest",
            );
        }

        // 2. verifyCode
        let code_measurement = self
            .verify_code(&repo, &release_digest)
            .await
            .map_err(EngineError::VerifyCode)?;
        if crate::engine_logs_enabled() {
            debug!(
                target: ENGINE_LOG_TARGET,
                code_fingerprint = %code_measurement.fingerprint(),
                "code provenance verified",
            );
        }

        // 3. verifyEnclave
        let attestation_doc = self
            .fetch_attestation_doc(enclave_host)
            .await
            .map_err(EngineError::VerifyEnclave)?;
        let evidence =
            doc::verify_document(attestation_doc, unix_now(), &self.snp_policy)
                .map_err(EngineError::VerifyEnclave)?;
        if crate::engine_logs_enabled() {
            debug!(
                target: ENGINE_LOG_TARGET,
                enclave_fingerprint = %evidence.measurement.fingerprint(),
                "live enclave attestation verified",
            );
        }

        // 4. verifyHardware (TDX evidence only)
        let hardware_measurement = match &evidence.tdx_hw_registers {
            Some((mrtd, rtmr0)) => Some(
                self.verify_hardware(mrtd, rtmr0)
                    .await
                    .map_err(EngineError::VerifyHardware)?,
            ),
            None => None,
        };

        // 5. validateTLS
        let tls_public_key_fingerprint = validate_tls(
            evidence.tls_fingerprint_hex.as_deref(),
            evidence.hpke_public_key.is_some(),
        )
        .map_err(EngineError::ValidateTls)?;

        // 6. measurements
        cove_enclave::equal(&code_measurement, &evidence.measurement)?;

        let code_fingerprint = code_measurement.fingerprint();
        let enclave_fingerprint = evidence.measurement.fingerprint();

        Ok(GroundTruth {
            release_digest,
            code_measurement,
            enclave_measurement: evidence.measurement,
            tls_public_key_fingerprint,
            hpke_public_key: evidence.hpke_public_key,
            hardware_measurement,
            code_fingerprint,
            enclave_fingerprint,
            selected_router_endpoint: enclave_host.to_owned(),
        })
    }

    async fn fetch_digest(
        &self,
        repo: &RepoPath,
    ) -> anyhow::Result<cove_enclave::ReleaseDigest> {
        let url = format!(
            "{}/repos/{}/{}/releases/latest",
            self.endpoints.github_proxy_base, repo.owner, repo.name,
        );
        let release: release::Release =
            self.get_json(&url, Some(GITHUB_ACCEPT)).await?;
        if crate::engine_logs_enabled() {
            debug!(
                target: ENGINE_LOG_TARGET,
                tag_name = %release.tag_name,
                "fetched latest release",
            );
        }
        release::extract_digest(&release.body)
            .ok_or_else(|| format_err!("Could not find digest in release notes"))
    }

    async fn verify_code(
        &self,
        repo: &RepoPath,
        digest: &cove_enclave::ReleaseDigest,
    ) -> anyhow::Result<cove_enclave::Measurement> {
        let url = format!(
            "{}/repos/{}/{}/attestations/sha256:{digest}",
            self.endpoints.github_proxy_base, repo.owner, repo.name,
        );
        let index: provenance::AttestationIndex =
            self.get_json(&url, Some(GITHUB_ACCEPT)).await?;
        provenance::code_measurement_from_bundle(index, digest)
    }

    async fn fetch_attestation_doc(
        &self,
        enclave_host: &str,
    ) -> anyhow::Result<doc::AttestationDoc> {
        let scheme = if self.endpoints.allow_insecure {
            "http"
        } else {
            "https"
        };
        let url = format!("{scheme}://{enclave_host}{ATTESTATION_PATH}");
        self.get_json(&url, None).await
    }

    async fn verify_hardware(
        &self,
        mrtd: &str,
        rtmr0: &str,
    ) -> anyhow::Result<HardwareMeasurement> {
        let registry: HardwareRegistry = self
            .get_json(&self.endpoints.hardware_registry_url, None)
            .await?;
        registry.find(mrtd, rtmr0).ok_or_else(|| {
            format_err!("TDX platform is not in the hardware registry")
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        accept: Option<&str>,
    ) -> anyhow::Result<T> {
        let mut request = self.http.get(url);
        if let Some(accept) = accept {
            request = request.header(reqwest::header::ACCEPT, accept);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        ensure!(
            response.status().is_success(),
            "{url} returned {}",
            response.status(),
        );
        response
            .json::<T>()
            .await
            .with_context(|| format!("{url} returned a malformed response"))
    }
}

impl Default for AttestationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn build_http_client(allow_insecure: bool) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(ENGINE_USER_AGENT)
        .use_preconfigured_tls(cove_tls::webpki_client_config())
        .https_only(!allow_insecure)
        .build()
        .expect("Failed to build reqwest Client")
}

struct RepoPath {
    owner: String,
    name: String,
}

impl RepoPath {
    fn parse(config_repo: &str) -> anyhow::Result<Self> {
        let (owner, name) = config_repo
            .split_once('/')
            .ok_or_else(|| format_err!("config repo must be 'owner/name'"))?;
        let valid_part = |part: &str| {
            !part.is_empty()
                && part.bytes().all(|b| {
                    b.is_ascii_alphanumeric() || b"-._".contains(&b)
                })
        };
        ensure!(
            valid_part(owner) && valid_part(name),
            "config repo must be 'owner/name', got '{config_repo}'",
        );
        Ok(Self {
            owner: owner.to_owned(),
            name: name.to_owned(),
        })
    }
}

fn validate_enclave_host(host: &str) -> anyhow::Result<()> {
    ensure!(!host.is_empty(), "enclave host is empty");
    ensure!(
        !host.contains('/') && !host.contains("://"),
        "enclave host must be a bare host[:port], got '{host}'",
    );
    Ok(())
}

fn validate_tls(
    fingerprint_hex: Option<&str>,
    have_hpke_key: bool,
) -> anyhow::Result<Option<cove_sha256::Hash>> {
    match fingerprint_hex {
        Some(s) => {
            let hash = cove_sha256::Hash::from_hex(s).map_err(|_| {
                format_err!(
                    "TLS public key fingerprint is not 32 hex bytes: '{s}'"
                )
            })?;
            Ok(Some(hash))
        }
        None if have_hpke_key => Ok(None),
        None => Err(format_err!(
            "attestation provided neither a TLS fingerprint nor an HPKE key"
        )),
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs() as i64
}
