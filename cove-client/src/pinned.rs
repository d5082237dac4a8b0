//! The pinned-TLS transport: no body transformation, but every connection
//! must terminate at the attested leaf key.

use http::header::AUTHORIZATION;
use reqwest::Url;

use crate::{
    error::ClientError,
    request::{self, NormalizedRequest, RequestInit, RequestInput},
    response::Response,
};

/// A `fetch`-shaped transport whose TLS client accepts exactly the leaf
/// whose SPKI hashes to the attested fingerprint. Plaintext HTTP is
/// refused outright.
pub struct PinnedTransport {
    base_url: Url,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl PinnedTransport {
    pub fn new(
        base_url: Url,
        expected_fingerprint: cove_sha256::Hash,
        api_key: Option<String>,
    ) -> Result<Self, ClientError> {
        let tls_config = cove_tls::pinned_client_config(expected_fingerprint);
        let http = reqwest::Client::builder()
            .user_agent(concat!("cove-client/", env!("CARGO_PKG_VERSION")))
            .use_preconfigured_tls(tls_config)
            .https_only(true)
            .build()
            .map_err(|err| {
                ClientError::Config(format!(
                    "failed to build pinned TLS client: {err}"
                ))
            })?;

        Ok(Self {
            base_url,
            api_key,
            http,
        })
    }

    pub async fn fetch(
        &self,
        input: impl Into<RequestInput>,
        init: Option<RequestInit>,
    ) -> Result<Response, ClientError> {
        let request = request::normalize(input.into(), init);
        let url = request::resolve_url(&self.base_url, &request.url)?;
        if url.scheme() != "https" {
            return Err(ClientError::PlaintextHttp);
        }

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
        let mut headers = request.headers;
        if let Some(api_key) = &self.api_key {
            if !headers.contains_key(AUTHORIZATION) {
                let value = http::HeaderValue::from_str(&format!(
                    "Bearer {api_key}"
                ))
                .map_err(|err| {
                    ClientError::Config(format!("invalid api key: {err}"))
                })?;
                headers.insert(AUTHORIZATION, value);
            }
        }

        let mut builder =
            self.http.request(request.method, url).headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_send_error)?;
        Ok(Response::from_streaming(response))
    }
}

/// A handshake rejected by the pin surfaces through reqwest as a connect
/// error wrapping the rustls message; report it as the key-pin failure it
/// is rather than a generic upstream error.
fn map_send_error(err: reqwest::Error) -> ClientError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(current) = source {
        if current.to_string().contains("Certificate fingerprint mismatch") {
            return ClientError::CertificateFingerprintMismatch;
        }
        source = current.source();
    }
    ClientError::upstream(err)
}
