//! The encrypted-body (EHBP) transport: every request body is sealed to the
//! enclave's HPKE public key discovered at the well-known key endpoint.

use std::sync::Arc;

use base64::Engine as _;
use bytes::Bytes;
use hpke::{
    Deserializable, Kem as KemTrait, OpModeR, OpModeS, Serializable,
    aead::AesGcm128, kdf::HkdfSha256, kem::X25519HkdfSha256,
};
use http::{
    HeaderName, HeaderValue,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use rand_core::OsRng;
use reqwest::Url;
use tracing::debug;

use crate::{
    error::ClientError,
    ohttp_keys,
    request::{self, NormalizedRequest, RequestInit, RequestInput},
    response::Response,
};

type Kem = X25519HkdfSha256;
type Kdf = HkdfSha256;
type Aead = AesGcm128;

/// Encapsulated-key header, set by the transport on encrypted requests and
/// by the server on encrypted responses.
pub const HEADER_ENCAPSULATED_KEY: HeaderName =
    HeaderName::from_static("ehbp-encapsulated-key");
/// The client's ephemeral public key, so the server can encrypt the
/// response back.
pub const HEADER_CLIENT_PUBLIC_KEY: HeaderName =
    HeaderName::from_static("ehbp-client-public-key");
/// Marks a bodiless request that carries nothing to encrypt.
pub const HEADER_FALLBACK: HeaderName =
    HeaderName::from_static("ehbp-fallback");

/// Where the server publishes its HPKE key configuration.
pub const WELL_KNOWN_HPKE_KEYS: &str = "/.well-known/hpke-keys";

const OHTTP_KEYS_CONTENT_TYPE: &str = "application/ohttp-keys";
const EHBP_CONTENT_TYPE: &str = "message/ehbp-req";

const REQUEST_INFO: &[u8] = b"ehbp request";
const RESPONSE_INFO: &[u8] = b"ehbp response";

const TARGET: &str = "cove_client::ehbp";

/// The long-lived encrypted transport for one `(base_url, key_origin)`.
///
/// The underlying handle (server key + client identity) is built lazily on
/// first use; construction is single-flight, and a failed build leaves the
/// slot empty so the next request retries discovery.
#[derive(Debug)]
pub struct EhbpTransport {
    base_url: Url,
    key_url: Url,
    expected_key: Option<Vec<u8>>,
    api_key: Option<String>,
    http: reqwest::Client,
    handle: tokio::sync::RwLock<Option<Arc<EhbpHandle>>>,
}

struct EhbpHandle {
    server_public_key: <Kem as KemTrait>::PublicKey,
    client_secret_key: <Kem as KemTrait>::PrivateKey,
    client_public_key_b64: String,
}

impl std::fmt::Debug for EhbpHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EhbpHandle")
            .field("client_public_key_b64", &self.client_public_key_b64)
            .finish_non_exhaustive()
    }
}

impl EhbpTransport {
    /// `key_origin` is `enclave_url` when supplied, otherwise the request
    /// origin. Key discovery requires HTTPS (localhost excepted, for
    /// testing).
    pub fn new(
        base_url: Url,
        expected_key: Option<Vec<u8>>,
        enclave_url: Option<Url>,
        api_key: Option<String>,
    ) -> Result<Self, ClientError> {
        let key_origin = enclave_url.unwrap_or_else(|| base_url.clone());
        let key_url =
            key_origin.join(WELL_KNOWN_HPKE_KEYS).map_err(|err| {
                ClientError::Config(format!(
                    "key discovery URL failed to resolve: {err}"
                ))
            })?;
        require_https_or_localhost(&key_url)?;

        Ok(Self {
            base_url,
            key_url,
            expected_key,
            api_key,
            http: build_http_client(),
            handle: tokio::sync::RwLock::new(None),
        })
    }

    /// Eagerly build the transport handle (discover + pin-check the server
    /// key). Requests do this lazily; `ready()` paths call it directly.
    pub async fn ensure_ready(&self) -> Result<(), ClientError> {
        self.handle().await.map(|_| ())
    }

    /// The `fetch`-shaped entry point.
    pub async fn fetch(
        &self,
        input: impl Into<RequestInput>,
        init: Option<RequestInit>,
    ) -> Result<Response, ClientError> {
        let request = request::normalize(input.into(), init);
        let url = request::resolve_url(&self.base_url, &request.url)?;
        require_https_or_localhost(&url)?;

        match request.signal.clone() {
            Some(signal) => {
                tokio::select! {
                    biased;
                    () = signal.cancelled() =>
                        Err(ClientError::Cancelled),
                    result = self.fetch_inner(url, request) => result,
                }
            }
            None => self.fetch_inner(url, request).await,
        }
    }

    async fn fetch_inner(
        &self,
        url: Url,
        request: NormalizedRequest,
    ) -> Result<Response, ClientError> {
        let handle = self.handle().await?;

        let mut headers = request.headers;
        // Transport-owned headers; caller-provided values are dropped.
        headers.remove(&HEADER_ENCAPSULATED_KEY);
        headers.remove(&HEADER_CLIENT_PUBLIC_KEY);
        headers.remove(&HEADER_FALLBACK);

        // Every request gets its own encapsulation; a bodiless request
        // seals an empty plaintext and carries the fallback marker so the
        // server treats the decrypted body as absent.
        let plaintext = match &request.body {
            Some(body) => body.as_ref(),
            None => {
                headers
                    .insert(HEADER_FALLBACK, HeaderValue::from_static("true"));
                &[][..]
            }
        };
        let (encapped_b64, ciphertext) = handle.seal(plaintext)?;
        headers.insert(HEADER_ENCAPSULATED_KEY, header_value(&encapped_b64)?);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(EHBP_CONTENT_TYPE),
        );
        let body = Some(ciphertext);
        headers.insert(
            HEADER_CLIENT_PUBLIC_KEY,
            header_value(&handle.client_public_key_b64)?,
        );
        if let Some(api_key) = &self.api_key {
            if !headers.contains_key(AUTHORIZATION) {
                headers.insert(
                    AUTHORIZATION,
                    header_value(&format!("Bearer {api_key}"))?,
                );
            }
        }

        let mut builder =
            self.http.request(request.method, url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(ClientError::upstream)?;
        let status = response.status();
        let response_headers = response.headers().clone();

        // An encapsulated response key means the body is sealed to our
        // ephemeral client key.
        let encapped = response_headers
            .get(&HEADER_ENCAPSULATED_KEY)
            .map(|value| {
                value.to_str().map(str::to_owned).map_err(|err| {
                    ClientError::Upstream(anyhow::Error::new(err))
                })
            })
            .transpose()?;

        match encapped {
            Some(encapped_b64) => {
                let ciphertext =
                    response.bytes().await.map_err(ClientError::upstream)?;
                let plaintext =
                    handle.open_response(&encapped_b64, &ciphertext)?;
                Ok(Response::from_buffered(
                    status,
                    response_headers,
                    Bytes::from(plaintext),
                ))
            }
            None => Ok(Response::from_streaming(response)),
        }
    }

    /// Get the shared handle, building it single-flight on first use.
    async fn handle(&self) -> Result<Arc<EhbpHandle>, ClientError> {
        if let Some(handle) = self.handle.read().await.as_ref() {
            return Ok(handle.clone());
        }

        let mut slot = self.handle.write().await;
        // Another caller may have finished the build while we waited.
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }

        // On error the slot stays empty, so the next caller retries.
        let handle = self.build_handle().await?;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    async fn build_handle(&self) -> Result<Arc<EhbpHandle>, ClientError> {
        let response = self
            .http
            .get(self.key_url.clone())
            .send()
            .await
            .map_err(|err| {
                ClientError::KeyDiscovery(anyhow::Error::new(err))
            })?;
        if !response.status().is_success() {
            return Err(ClientError::KeyDiscovery(anyhow::format_err!(
                "{} returned {}",
                self.key_url,
                response.status(),
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| {
                value.split(';').next().unwrap_or(value).trim().to_owned()
            });
        if content_type.as_deref() != Some(OHTTP_KEYS_CONTENT_TYPE) {
            return Err(ClientError::KeyDiscovery(anyhow::format_err!(
                "key endpoint returned content type {content_type:?}, \
                 expected {OHTTP_KEYS_CONTENT_TYPE}",
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| ClientError::KeyDiscovery(anyhow::Error::new(err)))?;
        let configs = ohttp_keys::parse_key_configs(&bytes)
            .map_err(ClientError::KeyDiscovery)?;
        let config = ohttp_keys::select_key_config(configs)
            .map_err(ClientError::KeyDiscovery)?;

        // The key pin: the discovered key must be the attested one.
        if let Some(expected) = &self.expected_key {
            if expected != &config.public_key {
                return Err(ClientError::HpkeKeyMismatch);
            }
        }

        let server_public_key =
            <Kem as KemTrait>::PublicKey::from_bytes(&config.public_key)
                .map_err(ClientError::Hpke)?;
        let (client_secret_key, client_public_key) =
            Kem::gen_keypair(&mut OsRng);
        let client_public_key_b64 = base64::engine::general_purpose::STANDARD
            .encode(client_public_key.to_bytes());

        debug!(
            target: TARGET,
            key_id = config.key_id,
            "built EHBP transport handle",
        );

        Ok(Arc::new(EhbpHandle {
            server_public_key,
            client_secret_key,
            client_public_key_b64,
        }))
    }
}

impl EhbpHandle {
    /// Seal a request body to the server key. Returns the base64
    /// encapsulated key and the ciphertext.
    fn seal(&self, plaintext: &[u8]) -> Result<(String, Vec<u8>), ClientError> {
        let (encapped_key, mut ctx) = hpke::setup_sender::<Aead, Kdf, Kem, _>(
            &OpModeS::Base,
            &self.server_public_key,
            REQUEST_INFO,
            &mut OsRng,
        )
        .map_err(ClientError::Hpke)?;
        let ciphertext =
            ctx.seal(plaintext, b"").map_err(ClientError::Hpke)?;

        let encapped_b64 = base64::engine::general_purpose::STANDARD
            .encode(encapped_key.to_bytes());
        Ok((encapped_b64, ciphertext))
    }

    /// Open a response body sealed to our ephemeral client key.
    fn open_response(
        &self,
        encapped_b64: &str,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, ClientError> {
        let encapped_bytes = base64::engine::general_purpose::STANDARD
            .decode(encapped_b64)
            .map_err(|err| ClientError::Upstream(anyhow::Error::new(err)))?;
        let encapped_key =
            <Kem as KemTrait>::EncappedKey::from_bytes(&encapped_bytes)
                .map_err(ClientError::Hpke)?;

        let mut ctx = hpke::setup_receiver::<Aead, Kdf, Kem>(
            &OpModeR::Base,
            &self.client_secret_key,
            &encapped_key,
            RESPONSE_INFO,
        )
        .map_err(ClientError::Hpke)?;
        ctx.open(ciphertext, b"").map_err(ClientError::Hpke)
    }
}

fn build_http_client() -> reqwest::Client {
    // Scheme policy is enforced per-URL in `require_https_or_localhost`, so
    // localhost testing over plain HTTP stays possible.
    reqwest::Client::builder()
        .user_agent(concat!("cove-client/", env!("CARGO_PKG_VERSION")))
        .use_preconfigured_tls(cove_tls::webpki_client_config())
        .build()
        .expect("Failed to build reqwest Client")
}

fn require_https_or_localhost(url: &Url) -> Result<(), ClientError> {
    if url.scheme() == "https" {
        return Ok(());
    }
    let is_localhost = matches!(
        url.host_str(),
        Some("localhost") | Some("127.0.0.1") | Some("[::1]")
    );
    if url.scheme() == "http" && is_localhost {
        return Ok(());
    }
    Err(ClientError::PlaintextHttp)
}

fn header_value(value: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(value).map_err(|err| {
        ClientError::Config(format!("invalid header value: {err}"))
    })
}
