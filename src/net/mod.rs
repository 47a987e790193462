//! Upstream network access.
//!
//! Everything that leaves the process goes through the [`Fetcher`] trait, so
//! strategies and the prefetch job can be exercised against scripted
//! responses. [`ReqwestFetcher`] is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::Method;
use tracing::debug;
use url::Url;

use crate::cache::{CachedResponse, RequestIdentity};
use crate::error::FetchError;

/// Default upstream request timeout in seconds.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// User agent for upstream requests.
const USER_AGENT_VALUE: &str = concat!("offline-map-proxy/", env!("CARGO_PKG_VERSION"));

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

// =============================================================================
// Request
// =============================================================================

/// An intercepted request, detached from the server's body type.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            url,
            headers,
            body,
        }
    }

    /// A bare GET for `url`.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, HeaderMap::new(), Bytes::new())
    }

    /// Cache key for this request.
    pub fn identity(&self) -> RequestIdentity {
        RequestIdentity::new(self.method.as_str(), self.url.as_str())
    }
}

/// Per-request fetch behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Drop `Cookie` and `Authorization` before sending.
    pub omit_credentials: bool,

    /// Ask every intermediate cache for a fresh copy.
    pub bypass_cache: bool,
}

impl FetchOptions {
    /// Options used by the prefetch worker pool.
    pub fn prefetch() -> Self {
        Self {
            omit_credentials: true,
            bypass_cache: true,
        }
    }
}

// =============================================================================
// Fetcher Trait
// =============================================================================

/// Network seam used by the router, the prefetch job and lifecycle commands.
///
/// A non-2xx answer is a successful fetch; only transport failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        request: &ProxyRequest,
        options: FetchOptions,
    ) -> Result<CachedResponse, FetchError>;
}

// =============================================================================
// Reqwest Fetcher
// =============================================================================

/// [`Fetcher`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Create a fetcher with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static(USER_AGENT_VALUE),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| {
                FetchError::InvalidRequest(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        request: &ProxyRequest,
        options: FetchOptions,
    ) -> Result<CachedResponse, FetchError> {
        let headers = outbound_headers(&request.headers, options);
        debug!(method = %request.method, url = %request.url, "Fetching upstream");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &request.url))?;

        let status = response.status().as_u16();
        let headers = inbound_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        debug!(url = %request.url, status, bytes = body.len(), "Upstream responded");
        Ok(CachedResponse::new(status, headers, body))
    }
}

fn map_reqwest_error(err: reqwest::Error, url: &Url) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if err.is_builder() {
        FetchError::InvalidRequest(err.to_string())
    } else {
        FetchError::Connection(err.to_string())
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Headers to send upstream for a request.
fn outbound_headers(incoming: &HeaderMap, options: FetchOptions) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(incoming.len() + 2);
    for (name, value) in incoming {
        if is_hop_by_hop(name) {
            continue;
        }
        if options.omit_credentials && (name == header::COOKIE || name == header::AUTHORIZATION) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if options.bypass_cache {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    }

    headers
}

/// Upstream response headers worth keeping, in arrival order.
fn inbound_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
