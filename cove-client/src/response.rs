//! The response type returned by the `fetch`-shaped callables.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::ClientError;

/// An HTTP response. Encrypted-transport responses arrive fully buffered
/// (the whole body is one decryption unit); pinned-TLS responses stream.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

#[derive(Debug)]
enum ResponseBody {
    Buffered(Option<Bytes>),
    Streaming(reqwest::Response),
}

impl Response {
    pub(crate) fn from_buffered(
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Buffered(Some(body)),
        }
    }

    pub(crate) fn from_streaming(response: reqwest::Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            body: ResponseBody::Streaming(response),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Read the whole response body.
    pub async fn bytes(self) -> Result<Bytes, ClientError> {
        match self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes.unwrap_or_default()),
            ResponseBody::Streaming(response) =>
                response.bytes().await.map_err(ClientError::upstream),
        }
    }

    /// Read the whole response body as UTF-8 text.
    pub async fn text(self) -> Result<String, ClientError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|err| {
            ClientError::Upstream(anyhow::Error::new(err))
        })
    }

    /// JSON-deserialize the whole response body.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|err| ClientError::Upstream(anyhow::Error::new(err)))
    }

    /// Stream a chunk of the response body. Returns `Ok(None)` when the
    /// stream is complete. A buffered body yields itself as one chunk.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, ClientError> {
        match &mut self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes.take()),
            ResponseBody::Streaming(response) =>
                response.chunk().await.map_err(ClientError::upstream),
        }
    }
}
