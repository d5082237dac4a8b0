//! The clearly-labeled opportunistic-privacy client: HPKE encryption with
//! discovery-trusted keys, no attestation.

use rand_core::{OsRng, RngCore};
use serde::Deserialize;

use crate::{
    client::{ClientConfig, resolve_config},
    ehbp::EhbpTransport,
    error::ClientError,
    request::{RequestInit, RequestInput},
    response::Response,
    verifier::VerificationDocument,
};

/// Where a key origin publishes its router list.
pub const WELL_KNOWN_ROUTERS: &str = "/.well-known/routers";

#[derive(Debug, Deserialize)]
struct RouterList {
    routers: Vec<String>,
}

/// Same `fetch` shape as [`SecureClient`], but requests are encrypted to
/// whatever HPKE key discovery returns, with no attestation backing it.
/// Use only where opportunistic privacy is acceptable.
///
/// [`SecureClient`]: crate::SecureClient
pub struct UnverifiedClient {
    transport: EhbpTransport,
}

impl UnverifiedClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let resolved = resolve_config(config)?;
        // Discovery-only: no expected-key pin.
        let transport = EhbpTransport::new(
            resolved.base_url,
            None,
            Some(resolved.enclave_url),
            resolved.api_key,
        )?;
        Ok(Self { transport })
    }

    /// Optional pre-step: fetch the router list from the configured origin
    /// and pick one uniformly at random, then construct the client against
    /// it. Never touches attested state (there is none here).
    pub async fn new_with_router_selection(
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let resolved = resolve_config(config.clone())?;
        let url = resolved
            .enclave_url
            .join(WELL_KNOWN_ROUTERS)
            .map_err(|err| {
                ClientError::Config(format!(
                    "router list URL failed to resolve: {err}"
                ))
            })?;

        let list: RouterList = reqwest::Client::builder()
            .use_preconfigured_tls(cove_tls::webpki_client_config())
            .build()
            .map_err(|err| ClientError::Upstream(anyhow::Error::new(err)))?
            .get(url)
            .send()
            .await
            .map_err(ClientError::upstream)?
            .json()
            .await
            .map_err(ClientError::upstream)?;

        if list.routers.is_empty() {
            return Err(ClientError::Config(
                "router list is empty".to_owned(),
            ));
        }
        let index = (OsRng.next_u32() as usize) % list.routers.len();
        let router = &list.routers[index];

        Self::new(ClientConfig {
            base_url: None,
            enclave_url: Some(format!("https://{router}/")),
            ..config
        })
    }

    /// Idempotent; discovers the server key so the first request doesn't
    /// pay for it.
    pub async fn ready(&self) -> Result<(), ClientError> {
        self.transport.ensure_ready().await
    }

    /// The `fetch`-shaped entry point.
    pub async fn fetch(
        &self,
        input: impl Into<RequestInput>,
        init: Option<RequestInit>,
    ) -> Result<Response, ClientError> {
        self.transport.fetch(input, init).await
    }

    /// Always fails: there is nothing verified to document.
    pub fn verification_document(
        &self,
    ) -> Result<VerificationDocument, ClientError> {
        Err(ClientError::UnverifiedDocument)
    }
}
