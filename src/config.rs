//! Configuration management for the offline map proxy.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `OMP_` prefix
//! - Sensible defaults for all optional settings
//!
//! The parsed [`Config`] is turned into a [`CacheConfig`], the explicit runtime
//! configuration handed to the router, the prefetch job and lifecycle commands.
//!
//! # Environment Variables
//!
//! - `OMP_HOST` - Server bind address (default: 127.0.0.1)
//! - `OMP_PORT` - Server port (default: 8080)
//! - `OMP_DB_PATH` - Tier database path (default: platform data dir)
//! - `OMP_EPHEMERAL` - Keep tiers in memory only
//! - `OMP_APP_SCOPE` - Application base URL (default: http://localhost/)
//! - `OMP_STATIC_VERSION`, `OMP_TILE_VERSION`, `OMP_METADATA_VERSION`,
//!   `OMP_HTML_VERSION` - Tier version tags
//! - `OMP_MAX_TILE_ENTRIES` - Tile tier bound (default: 500)
//! - `OMP_PREFETCH_CONCURRENCY` - Prefetch pool width (default: 10)
//! - `OMP_UPSTREAM_TIMEOUT` - Upstream timeout in seconds (default: 30)
//! - `OMP_WARM_URLS` - Static assets warmed at install (comma-separated)
//! - `OMP_PROVIDER_HOST`, `OMP_PROVIDER_SCHEME`, `OMP_PROVIDER_API_BASE` - Map provider
//! - `OMP_CDN_HOSTS`, `OMP_API_HOSTS` - Host lists (comma-separated)
//! - `OMP_CONTROL_TOKEN` - Bearer token for `/_offline/*`
//! - `OMP_CORS_ORIGINS` - Allowed CORS origins (comma-separated)

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use crate::cache::{
    TierSet, DEFAULT_APP_SCOPE, DEFAULT_HTML_VERSION, DEFAULT_MAX_TILE_ENTRIES,
    DEFAULT_METADATA_VERSION, DEFAULT_STATIC_VERSION, DEFAULT_TILE_VERSION,
};
use crate::net::DEFAULT_UPSTREAM_TIMEOUT_SECS;
use crate::prefetch::DEFAULT_PREFETCH_CONCURRENCY;
use crate::tile::{DEFAULT_PROVIDER_API_BASE, DEFAULT_PROVIDER_HOST, DEFAULT_PROVIDER_SCHEME};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Upper bound for the prefetch pool width.
pub const MAX_PREFETCH_CONCURRENCY: usize = 64;

/// Static-CDN hosts served cache-first.
pub const DEFAULT_CDN_HOSTS: &[&str] = &[
    "cdn.jsdelivr.net",
    "cdnjs.cloudflare.com",
    "fonts.googleapis.com",
    "fonts.gstatic.com",
    "unpkg.com",
];

/// Backend data-API hosts that are never cached.
pub const DEFAULT_API_HOSTS: &[&str] = &["supabase.co"];

/// Provider path segments that mark a request as map-provider traffic.
pub const DEFAULT_PROVIDER_PATH_MARKERS: &[&str] = &["/v4/", "/styles/"];

/// Static assets warmed into the static tier at install time.
pub const DEFAULT_WARM_URLS: &[&str] = &[
    "https://cdn.jsdelivr.net/npm/mapbox-gl@3.4.0/dist/mapbox-gl.min.css",
    "https://cdn.jsdelivr.net/npm/mapbox-gl@3.4.0/dist/mapbox-gl.min.js",
    "https://fonts.googleapis.com/css2?family=Plus+Jakarta+Sans:wght@400;500;600;700&display=swap",
    "https://cdn.jsdelivr.net/npm/xlsx@0.18.5/dist/xlsx.full.min.js",
    "https://cdn.jsdelivr.net/npm/jsqr@1.4.0/dist/jsQR.min.js",
    "https://cdn.jsdelivr.net/npm/@supabase/supabase-js@2/dist/umd/supabase.min.js",
];

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Explicit runtime configuration shared by the router, prefetch and lifecycle.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Physical tier names in use
    pub tiers: TierSet,

    /// Application base URL, always ending in `/`
    pub app_scope: String,

    /// Map provider host (suffix-matched)
    pub provider_host: String,

    /// Map provider URL scheme, e.g. `mapbox`
    pub provider_scheme: String,

    /// Map provider API base URL
    pub provider_api_base: String,

    /// Path segments that mark provider traffic on any host
    pub provider_path_markers: Vec<String>,

    /// Static-CDN hosts (suffix-matched)
    pub cdn_hosts: Vec<String>,

    /// Backend data-API hosts (suffix-matched)
    pub api_hosts: Vec<String>,

    /// Maximum number of entries in the tile tier
    pub max_tile_entries: usize,

    /// Prefetch worker pool width
    pub prefetch_concurrency: usize,

    /// Static assets warmed at install
    pub warm_urls: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tiers: TierSet::default(),
            app_scope: DEFAULT_APP_SCOPE.to_string(),
            provider_host: DEFAULT_PROVIDER_HOST.to_string(),
            provider_scheme: DEFAULT_PROVIDER_SCHEME.to_string(),
            provider_api_base: DEFAULT_PROVIDER_API_BASE.to_string(),
            provider_path_markers: owned(DEFAULT_PROVIDER_PATH_MARKERS),
            cdn_hosts: owned(DEFAULT_CDN_HOSTS),
            api_hosts: owned(DEFAULT_API_HOSTS),
            max_tile_entries: DEFAULT_MAX_TILE_ENTRIES,
            prefetch_concurrency: DEFAULT_PREFETCH_CONCURRENCY,
            warm_urls: owned(DEFAULT_WARM_URLS),
        }
    }
}

impl CacheConfig {
    /// Set the application scope.
    pub fn with_app_scope(mut self, scope: impl Into<String>) -> Self {
        self.app_scope = scope.into();
        self
    }

    /// Set the tile tier bound.
    pub fn with_max_tile_entries(mut self, max: usize) -> Self {
        self.max_tile_entries = max;
        self
    }

    /// Set the prefetch pool width.
    pub fn with_prefetch_concurrency(mut self, width: usize) -> Self {
        self.prefetch_concurrency = width;
        self
    }

    /// Set the install-time warm list.
    pub fn with_warm_urls(mut self, urls: Vec<String>) -> Self {
        self.warm_urls = urls;
        self
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Offline Map Proxy - an offline-first caching proxy for map applications.
///
/// Serves intercepted requests from versioned cache tiers, keeps map tiles
/// fresh in the background and downloads whole areas for offline use.
#[derive(Parser, Debug, Clone)]
#[command(name = "offline-map-proxy")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "OMP_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "OMP_PORT")]
    pub port: u16,

    /// Bearer token required on `/_offline/*` control routes.
    ///
    /// If not specified, control routes are open.
    #[arg(long, env = "OMP_CONTROL_TOKEN")]
    pub control_token: Option<String>,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// Path of the SQLite tier database.
    ///
    /// Defaults to `offline-map-proxy/tiers.db` under the platform data directory.
    #[arg(long, env = "OMP_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Keep all tiers in memory; nothing survives a restart.
    #[arg(long, default_value_t = false, env = "OMP_EPHEMERAL")]
    pub ephemeral: bool,

    /// Version tag of the static-assets tier.
    #[arg(long, default_value = DEFAULT_STATIC_VERSION, env = "OMP_STATIC_VERSION")]
    pub static_version: String,

    /// Version tag of the tile-data tier.
    #[arg(long, default_value = DEFAULT_TILE_VERSION, env = "OMP_TILE_VERSION")]
    pub tile_version: String,

    /// Version tag of the map-api-metadata tier.
    #[arg(long, default_value = DEFAULT_METADATA_VERSION, env = "OMP_METADATA_VERSION")]
    pub metadata_version: String,

    /// Version tag of the page-html tier.
    #[arg(long, default_value = DEFAULT_HTML_VERSION, env = "OMP_HTML_VERSION")]
    pub html_version: String,

    /// Maximum number of entries kept in the tile tier.
    #[arg(long, default_value_t = DEFAULT_MAX_TILE_ENTRIES, env = "OMP_MAX_TILE_ENTRIES")]
    pub max_tile_entries: usize,

    // =========================================================================
    // Application Configuration
    // =========================================================================
    /// Base URL of the application; must end with `/`.
    #[arg(long, default_value = DEFAULT_APP_SCOPE, env = "OMP_APP_SCOPE")]
    pub app_scope: String,

    /// Static assets to warm at install (comma-separated).
    ///
    /// If not specified, the built-in asset list is used.
    #[arg(long = "warm-url", env = "OMP_WARM_URLS", value_delimiter = ',')]
    pub warm_urls: Option<Vec<String>>,

    // =========================================================================
    // Upstream Configuration
    // =========================================================================
    /// Upstream request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_UPSTREAM_TIMEOUT_SECS, env = "OMP_UPSTREAM_TIMEOUT")]
    pub upstream_timeout: u64,

    /// Map provider host.
    #[arg(long, default_value = DEFAULT_PROVIDER_HOST, env = "OMP_PROVIDER_HOST")]
    pub provider_host: String,

    /// Map provider style URL scheme.
    #[arg(long, default_value = DEFAULT_PROVIDER_SCHEME, env = "OMP_PROVIDER_SCHEME")]
    pub provider_scheme: String,

    /// Map provider API base URL.
    #[arg(long, default_value = DEFAULT_PROVIDER_API_BASE, env = "OMP_PROVIDER_API_BASE")]
    pub provider_api_base: String,

    /// Static-CDN hosts (comma-separated).
    #[arg(long, env = "OMP_CDN_HOSTS", value_delimiter = ',')]
    pub cdn_hosts: Option<Vec<String>>,

    /// Backend data-API hosts (comma-separated).
    #[arg(long, env = "OMP_API_HOSTS", value_delimiter = ',')]
    pub api_hosts: Option<Vec<String>>,

    // =========================================================================
    // Prefetch Configuration
    // =========================================================================
    /// Number of concurrent downloads in an area prefetch.
    #[arg(long, default_value_t = DEFAULT_PREFETCH_CONCURRENCY, env = "OMP_PREFETCH_CONCURRENCY")]
    pub prefetch_concurrency: usize,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "OMP_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.ephemeral && self.db_path.is_some() {
            return Err("--ephemeral and --db-path cannot be used together".to_string());
        }

        match Url::parse(&self.app_scope) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(format!(
                    "app_scope must be an absolute http(s) URL, got '{}'",
                    self.app_scope
                ))
            }
        }
        if !self.app_scope.ends_with('/') {
            return Err("app_scope must end with '/'".to_string());
        }

        for (name, version) in [
            ("static_version", &self.static_version),
            ("tile_version", &self.tile_version),
            ("metadata_version", &self.metadata_version),
            ("html_version", &self.html_version),
        ] {
            if version.is_empty() || version.chars().any(char::is_whitespace) {
                return Err(format!("{} must be a non-empty tag without spaces", name));
            }
        }

        if self.max_tile_entries == 0 {
            return Err("max_tile_entries must be greater than 0".to_string());
        }

        if self.prefetch_concurrency == 0 || self.prefetch_concurrency > MAX_PREFETCH_CONCURRENCY {
            return Err(format!(
                "prefetch_concurrency must be between 1 and {}",
                MAX_PREFETCH_CONCURRENCY
            ));
        }

        if self.upstream_timeout == 0 {
            return Err("upstream_timeout must be greater than 0".to_string());
        }

        if Url::parse(&self.provider_api_base).is_err() {
            return Err(format!(
                "provider_api_base must be an absolute URL, got '{}'",
                self.provider_api_base
            ));
        }

        if matches!(&self.control_token, Some(token) if token.is_empty()) {
            return Err("control_token must not be empty when set".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the runtime configuration.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            tiers: TierSet::new(
                &self.static_version,
                &self.tile_version,
                &self.metadata_version,
                &self.html_version,
            ),
            app_scope: self.app_scope.clone(),
            provider_host: self.provider_host.clone(),
            provider_scheme: self.provider_scheme.clone(),
            provider_api_base: self.provider_api_base.trim_end_matches('/').to_string(),
            provider_path_markers: owned(DEFAULT_PROVIDER_PATH_MARKERS),
            cdn_hosts: self
                .cdn_hosts
                .clone()
                .unwrap_or_else(|| owned(DEFAULT_CDN_HOSTS)),
            api_hosts: self
                .api_hosts
                .clone()
                .unwrap_or_else(|| owned(DEFAULT_API_HOSTS)),
            max_tile_entries: self.max_tile_entries,
            prefetch_concurrency: self.prefetch_concurrency,
            warm_urls: self
                .warm_urls
                .clone()
                .unwrap_or_else(|| owned(DEFAULT_WARM_URLS)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
