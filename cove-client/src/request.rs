//! Request input normalization for the `fetch`-shaped callables.

use bytes::Bytes;
use http::{HeaderMap, Method};
use reqwest::Url;

use crate::{cancel::CancelSignal, error::ClientError};

/// What callers may pass as the first `fetch` argument: a bare URL (string
/// or parsed), or a fully prepared request whose fields are merged with the
/// caller-provided [`RequestInit`].
#[derive(Clone, Debug)]
pub enum RequestInput {
    Url(String),
    Prepared(PreparedRequest),
}

/// A request-like object: contributes method, headers, body, and signal.
#[derive(Clone, Debug)]
pub struct PreparedRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub signal: Option<CancelSignal>,
}

impl PreparedRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            signal: None,
        }
    }
}

impl From<&str> for RequestInput {
    fn from(url: &str) -> Self {
        Self::Url(url.to_owned())
    }
}

impl From<String> for RequestInput {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<Url> for RequestInput {
    fn from(url: Url) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<PreparedRequest> for RequestInput {
    fn from(request: PreparedRequest) -> Self {
        Self::Prepared(request)
    }
}

/// Caller-provided overrides; every field beats the corresponding
/// [`PreparedRequest`] field.
#[derive(Clone, Debug, Default)]
pub struct RequestInit {
    pub method: Option<Method>,
    pub headers: Option<HeaderMap>,
    pub body: Option<Bytes>,
    pub signal: Option<CancelSignal>,
}

/// The result of normalization: one flat request ready for a transport.
#[derive(Clone, Debug)]
pub(crate) struct NormalizedRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub signal: Option<CancelSignal>,
}

/// Flatten `(input, init)` into one request. A bare URL contributes only the
/// URL; a prepared request is cloned and contributes method, headers, body,
/// and signal; `init` fields override either.
pub(crate) fn normalize(
    input: RequestInput,
    init: Option<RequestInit>,
) -> NormalizedRequest {
    let init = init.unwrap_or_default();

    let (url, method, headers, body, signal) = match input {
        RequestInput::Url(url) =>
            (url, Method::GET, HeaderMap::new(), None, None),
        RequestInput::Prepared(request) => (
            request.url,
            request.method,
            request.headers,
            request.body,
            request.signal,
        ),
    };

    NormalizedRequest {
        url,
        method: init.method.unwrap_or(method),
        headers: init.headers.unwrap_or(headers),
        body: init.body.or(body),
        signal: init.signal.or(signal),
    }
}

/// Resolve `target` against `base` per RFC 3986. Absolute targets are
/// preserved as-is.
pub(crate) fn resolve_url(
    base: &Url,
    target: &str,
) -> Result<Url, ClientError> {
    base.join(target).map_err(|err| {
        ClientError::Config(format!(
            "request URL '{target}' failed to resolve: {err}"
        ))
    })
}

/// Extract a cancellation signal without consuming the input.
pub(crate) fn peek_signal(
    input: &RequestInput,
    init: Option<&RequestInit>,
) -> Option<CancelSignal> {
    init.and_then(|init| init.signal.clone()).or_else(|| {
        match input {
            RequestInput::Prepared(request) => request.signal.clone(),
            RequestInput::Url(_) => None,
        }
    })
}
