// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

/// Timeout for header-only probe requests. Body transfers are unbounded.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A streaming response body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// HTTP response with status, content length, and body stream
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Content-Length header value, if present
    pub content_length: Option<u64>,
    /// Response body as a stream of bytes
    pub body: ByteStream,
}

/// Size and validator advertised by a remote resource, from a HEAD request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteInfo {
    /// Declared Content-Length, if the server sent one
    pub content_length: Option<u64>,
    /// Opaque entity tag, if the server sent one
    pub etag: Option<String>,
}

/// HTTP client abstraction for testability
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Fetch the entire response body as bytes
    async fn get_bytes(&self, url: &str) -> Result<Bytes, reqwest::Error>;

    /// Get a streaming response for large downloads
    async fn get_stream(&self, url: &str) -> Result<HttpResponse, reqwest::Error>;

    /// Issue a header-only request for the resource's size and entity tag
    async fn head(&self, url: &str) -> Result<RemoteInfo, reqwest::Error>;
}

/// Probe a remote resource, treating any transport failure as absent data.
///
/// Callers cannot shortcut change detection without this information, so a
/// `None` aborts the comparison for the current entry.
pub async fn probe_remote<C: HttpClient + ?Sized>(client: &C, url: &str) -> Option<RemoteInfo> {
    client.head(url).await.ok()
}

/// Default HTTP client implementation using reqwest
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Create a new ReqwestClient with default settings
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a new ReqwestClient with a custom reqwest::Client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get_bytes(&self, url: &str) -> Result<Bytes, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await
    }

    async fn get_stream(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let content_length = response.content_length();

        let body: ByteStream = Box::pin(response.bytes_stream());

        Ok(HttpResponse {
            status,
            content_length,
            body,
        })
    }

    async fn head(&self, url: &str) -> Result<RemoteInfo, reqwest::Error> {
        let response = self
            .client
            .head(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Ok(RemoteInfo {
            content_length: response.content_length(),
            etag,
        })
    }
}
