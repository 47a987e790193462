//! Cache keys and stored responses.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Cache key: request method plus absolute URL.
///
/// Only GET identities are ever written to a tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestIdentity {
    pub method: String,
    pub url: String,
}

impl RequestIdentity {
    /// Create an identity from a method and URL.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
        }
    }

    /// Shorthand for a GET identity.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Whether this identity may be cached.
    pub fn is_cacheable(&self) -> bool {
        self.method == "GET"
    }

    /// Path component of the URL, or the raw URL when it does not parse.
    pub fn path(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(url) => url.path().to_string(),
            Err(_) => self.url.clone(),
        }
    }
}

impl std::fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A response as stored in (or served from) a cache tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// HTTP status code
    pub status: u16,

    /// Response headers in arrival order
    pub headers: Vec<(String, String)>,

    /// Response body
    pub body: Bytes,
}

impl CachedResponse {
    /// Create a response from its parts.
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value matching `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The `Content-Type` header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}
