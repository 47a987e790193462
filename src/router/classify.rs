//! Request classification.
//!
//! A [`ClassifierChain`] holds prioritised [`RequestClassifier`] predicates;
//! the first one that recognises a request decides its [`RequestClass`].
//! Anything no predicate claims is [`RequestClass::Generic`].

use http::header::{HeaderMap, ACCEPT};
use http::Method;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::net::ProxyRequest;
use crate::tile::host_matches;

/// Browser-extension URL schemes that are never intercepted.
pub const EXTENSION_SCHEMES: &[&str] = &["chrome-extension", "moz-extension"];

/// Path segments that make a provider request a tile.
pub const TILE_PATH_MARKERS: &[&str] = &["/v4/", "/tiles/"];

/// File extensions that make a provider request a tile.
pub const TILE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".pbf", ".mvt"];

/// Provider paths that are always metadata, whatever their extension.
pub const METADATA_PATH_MARKERS: &[&str] = &["/sprite", "/fonts/", "/glyphs/"];

/// How an intercepted request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    /// Forwarded verbatim, never cached
    Passthrough,
    /// Page navigation: network first, offline fallback
    Navigate,
    /// Map tile: stale-while-revalidate into the tile tier
    Tile,
    /// Map style/sprite/glyph: stale-while-revalidate into the metadata tier
    Metadata,
    /// Static CDN asset: cache first
    StaticAsset,
    /// Backend data API: network only
    ApiOnly,
    /// Everything else: network first, cache fallback
    Generic,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::Passthrough => "passthrough",
            RequestClass::Navigate => "navigate",
            RequestClass::Tile => "tile",
            RequestClass::Metadata => "metadata",
            RequestClass::StaticAsset => "static_asset",
            RequestClass::ApiOnly => "api_only",
            RequestClass::Generic => "generic",
        }
    }
}

/// Whether the headers describe a top-level page navigation.
pub fn is_navigation(headers: &HeaderMap) -> bool {
    let mode = headers.get("sec-fetch-mode").and_then(|v| v.to_str().ok());
    let dest = headers.get("sec-fetch-dest").and_then(|v| v.to_str().ok());

    match (mode, dest) {
        (None, None) => headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html")),
        (mode, dest) => {
            mode.is_some_and(|m| m.eq_ignore_ascii_case("navigate"))
                || dest.is_some_and(|d| d.eq_ignore_ascii_case("document"))
        }
    }
}

fn host_in(request: &ProxyRequest, hosts: &[String]) -> bool {
    request
        .url
        .host_str()
        .is_some_and(|host| hosts.iter().any(|name| host_matches(host, name)))
}

// =============================================================================
// Classifier Trait
// =============================================================================

/// A single classification predicate.
pub trait RequestClassifier: Send + Sync {
    /// Return the class when this predicate recognises the request.
    fn classify(&self, request: &ProxyRequest) -> Option<RequestClass>;
}

/// Non-GET requests are forwarded untouched.
pub struct NonGetClassifier;

impl RequestClassifier for NonGetClassifier {
    fn classify(&self, request: &ProxyRequest) -> Option<RequestClass> {
        (request.method != Method::GET).then_some(RequestClass::Passthrough)
    }
}

/// Browser-extension URLs are forwarded untouched.
pub struct ExtensionSchemeClassifier;

impl RequestClassifier for ExtensionSchemeClassifier {
    fn classify(&self, request: &ProxyRequest) -> Option<RequestClass> {
        EXTENSION_SCHEMES
            .contains(&request.url.scheme())
            .then_some(RequestClass::Passthrough)
    }
}

/// Page navigations.
pub struct NavigationClassifier;

impl RequestClassifier for NavigationClassifier {
    fn classify(&self, request: &ProxyRequest) -> Option<RequestClass> {
        is_navigation(&request.headers).then_some(RequestClass::Navigate)
    }
}

/// Map provider traffic, split into tiles and metadata.
pub struct ProviderClassifier {
    host: String,
    path_markers: Vec<String>,
}

impl ProviderClassifier {
    pub fn new(host: impl Into<String>, path_markers: Vec<String>) -> Self {
        Self {
            host: host.into(),
            path_markers,
        }
    }

    fn is_provider(&self, request: &ProxyRequest) -> bool {
        let path = request.url.path();
        request
            .url
            .host_str()
            .is_some_and(|host| host_matches(host, &self.host))
            || self.path_markers.iter().any(|m| path.contains(m.as_str()))
    }
}

/// Tile vs metadata for a provider path.
pub fn provider_class(path: &str) -> RequestClass {
    if METADATA_PATH_MARKERS.iter().any(|m| path.contains(m)) {
        return RequestClass::Metadata;
    }
    let lower = path.to_ascii_lowercase();
    if TILE_PATH_MARKERS.iter().any(|m| path.contains(m))
        || TILE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
    {
        RequestClass::Tile
    } else {
        RequestClass::Metadata
    }
}

impl RequestClassifier for ProviderClassifier {
    fn classify(&self, request: &ProxyRequest) -> Option<RequestClass> {
        self.is_provider(request)
            .then(|| provider_class(request.url.path()))
    }
}

/// Fixed class for a list of hosts.
pub struct HostClassifier {
    hosts: Vec<String>,
    class: RequestClass,
}

impl HostClassifier {
    pub fn new(hosts: Vec<String>, class: RequestClass) -> Self {
        Self { hosts, class }
    }
}

impl RequestClassifier for HostClassifier {
    fn classify(&self, request: &ProxyRequest) -> Option<RequestClass> {
        host_in(request, &self.hosts).then_some(self.class)
    }
}

// =============================================================================
// Classifier Chain
// =============================================================================

/// Prioritised list of classifiers; first match wins.
pub struct ClassifierChain {
    classifiers: Vec<Box<dyn RequestClassifier>>,
}

impl ClassifierChain {
    pub fn new(classifiers: Vec<Box<dyn RequestClassifier>>) -> Self {
        Self { classifiers }
    }

    /// The standard chain for a configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(vec![
            Box::new(NonGetClassifier),
            Box::new(ExtensionSchemeClassifier),
            Box::new(NavigationClassifier),
            Box::new(ProviderClassifier::new(
                config.provider_host.clone(),
                config.provider_path_markers.clone(),
            )),
            Box::new(HostClassifier::new(
                config.cdn_hosts.clone(),
                RequestClass::StaticAsset,
            )),
            Box::new(HostClassifier::new(
                config.api_hosts.clone(),
                RequestClass::ApiOnly,
            )),
        ])
    }

    pub fn classify(&self, request: &ProxyRequest) -> RequestClass {
        self.classifiers
            .iter()
            .find_map(|c| c.classify(request))
            .unwrap_or(RequestClass::Generic)
    }
}
