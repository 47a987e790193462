use thiserror::Error;

/// Errors that can occur when fetching a resource from the network
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network or connection error (DNS, refused, reset, TLS)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Upstream did not answer in time
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// The request could not be turned into an upstream request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The response body could not be read to completion
    #[error("Failed to read response body: {0}")]
    Body(String),
}

/// Errors raised by a cache tier store
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// SQLite reported an error
    #[error("SQLite error: {0}")]
    Sqlite(String),

    /// A stored response could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Tiers only hold successful responses
    #[error("Refusing to cache non-2xx response (status {status}) for {url}")]
    UncacheableStatus { status: u16, url: String },

    /// The store's connection lock was poisoned by a panicking writer
    #[error("Storage lock poisoned: {0}")]
    LockPoisoned(String),

    /// A blocking storage task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    TaskFailed(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Sqlite(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Errors that can occur when resolving a map style reference
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StyleError {
    /// Reference is neither a provider-scheme reference nor an http(s) URL
    #[error("Unsupported style reference: {0}")]
    UnsupportedReference(String),

    /// Reference looked like a URL but could not be parsed
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Provider-scheme reference without `{owner}/{style}` segments
    #[error("Style reference '{0}' must have the form scheme://styles/{{owner}}/{{style}}")]
    MissingOwnerOrStyle(String),
}

/// Errors that abort an area prefetch job before any tile is downloaded
#[derive(Debug, Clone, Error)]
pub enum PrefetchError {
    /// The style reference could not be resolved to a URL
    #[error("Style error: {0}")]
    Style(#[from] StyleError),

    /// The style descriptor could not be fetched
    #[error("Failed to fetch style descriptor: {0}")]
    DescriptorFetch(#[from] FetchError),

    /// The style descriptor endpoint answered with a non-2xx status
    #[error("Style descriptor request returned HTTP {status}")]
    DescriptorStatus { status: u16 },

    /// The style descriptor is not valid JSON
    #[error("Style descriptor is not valid JSON: {0}")]
    DescriptorParse(String),

    /// Bounding box or zoom range cannot describe an area
    #[error("Invalid area: {reason}")]
    InvalidArea { reason: String },

    /// The descriptor copy could not be stored
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A job for the same area is still running
    #[error("A prefetch job for area '{area_name}' is already running")]
    AlreadyRunning { area_name: String },
}
