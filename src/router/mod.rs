//! Cache router: classifies intercepted requests and serves them through a
//! caching strategy.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          CacheRouter                             │
//! │   handle(request)                                                │
//! │     1. ClassifierChain ──► RequestClass                          │
//! │     2. strategy for the class                                    │
//! │                                                                  │
//! │   Passthrough ─► forward verbatim                                │
//! │   Navigate    ─► network first, FallbackResolver, offline page   │
//! │   Tile/Meta   ─► stale-while-revalidate (+ bounder for tiles)    │
//! │   StaticAsset ─► cache first                                     │
//! │   ApiOnly     ─► network only, synthetic 503                     │
//! │   Generic     ─► network first, static tier fallback             │
//! └──────┬──────────────────────┬──────────────────────┬─────────────┘
//!        ▼                      ▼                      ▼
//!   ┌──────────┐         ┌────────────┐       ┌─────────────────┐
//!   │ Fetcher  │         │ TierStore  │       │ BackgroundTasks │
//!   └──────────┘         └────────────┘       └─────────────────┘
//! ```
//!
//! The router always produces a response; failures become synthetic
//! responses rather than errors.

mod classify;
mod strategy;
mod synthetic;
mod tasks;

use std::sync::Arc;

use tracing::debug;

use crate::cache::{CachedResponse, FallbackResolver, TierStore};
use crate::config::CacheConfig;
use crate::net::{Fetcher, ProxyRequest};

pub use classify::{
    is_navigation, provider_class, ClassifierChain, ExtensionSchemeClassifier, HostClassifier,
    NavigationClassifier, NonGetClassifier, ProviderClassifier, RequestClass, RequestClassifier,
    EXTENSION_SCHEMES, METADATA_PATH_MARKERS, TILE_EXTENSIONS, TILE_PATH_MARKERS,
};
pub use synthetic::{bad_gateway, offline_json, offline_page, unavailable, OFFLINE_JSON_BODY};
pub use tasks::BackgroundTasks;

/// Header carrying [`ResponseSource`] on proxied responses.
pub const SOURCE_HEADER: &str = "x-offline-source";

// =============================================================================
// Routed Response
// =============================================================================

/// Where a routed response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
    /// Fresh from the network
    Network,
    /// Served from a cache tier
    Cache { tier: String },
    /// Built locally
    Synthetic,
    /// Forwarded without caching
    Passthrough,
}

impl ResponseSource {
    /// Source for a hit in `tier`.
    pub fn cache(tier: impl Into<String>) -> Self {
        ResponseSource::Cache { tier: tier.into() }
    }

    /// Value for the [`SOURCE_HEADER`] header.
    pub fn header_value(&self) -> String {
        match self {
            ResponseSource::Network => "network".to_string(),
            ResponseSource::Cache { tier } => format!("cache; tier={}", tier),
            ResponseSource::Synthetic => "synthetic".to_string(),
            ResponseSource::Passthrough => "passthrough".to_string(),
        }
    }
}

/// Result of routing one intercepted request.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub class: RequestClass,
    pub source: ResponseSource,
    pub response: CachedResponse,
}

impl RoutedResponse {
    fn new(class: RequestClass, source: ResponseSource, response: CachedResponse) -> Self {
        Self {
            class,
            source,
            response,
        }
    }
}

// =============================================================================
// Cache Router
// =============================================================================

/// Routes intercepted requests through the caching strategies.
///
/// # Type Parameters
///
/// * `S` - Tier store (defaults to a trait object so the server can pick one at startup)
/// * `F` - Network fetcher
pub struct CacheRouter<S: ?Sized = dyn TierStore, F: ?Sized = dyn Fetcher> {
    store: Arc<S>,
    fetcher: Arc<F>,
    config: Arc<CacheConfig>,
    classifier: Arc<ClassifierChain>,
    fallback: FallbackResolver,
    tasks: BackgroundTasks,
}

impl<S: ?Sized, F: ?Sized> Clone for CacheRouter<S, F> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            fetcher: self.fetcher.clone(),
            config: self.config.clone(),
            classifier: self.classifier.clone(),
            fallback: self.fallback.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<S, F> CacheRouter<S, F>
where
    S: TierStore + ?Sized + 'static,
    F: Fetcher + ?Sized + 'static,
{
    /// Create a router with the standard classifier chain for `config`.
    pub fn new(store: Arc<S>, fetcher: Arc<F>, config: Arc<CacheConfig>) -> Self {
        let classifier = ClassifierChain::from_config(&config);
        Self::with_classifier(store, fetcher, config, classifier)
    }

    /// Create a router with a custom classifier chain.
    pub fn with_classifier(
        store: Arc<S>,
        fetcher: Arc<F>,
        config: Arc<CacheConfig>,
        classifier: ClassifierChain,
    ) -> Self {
        let fallback = FallbackResolver::new(config.tiers.clone(), &config.app_scope);
        Self {
            store,
            fetcher,
            config,
            classifier: Arc::new(classifier),
            fallback,
            tasks: BackgroundTasks::new(),
        }
    }

    /// Classify without serving.
    pub fn classify(&self, request: &ProxyRequest) -> RequestClass {
        self.classifier.classify(request)
    }

    /// Serve one intercepted request.
    pub async fn handle(&self, request: ProxyRequest) -> RoutedResponse {
        let class = self.classify(&request);
        debug!(
            method = %request.method,
            url = %request.url,
            class = class.as_str(),
            "Routing request"
        );

        let tiers = &self.config.tiers;
        let (source, response) = match class {
            RequestClass::Passthrough => self.passthrough(&request).await,
            RequestClass::Navigate => self.network_first_with_fallback(&request).await,
            RequestClass::Tile => {
                self.stale_while_revalidate(
                    request,
                    tiers.tile_data.clone(),
                    Some(self.config.max_tile_entries),
                )
                .await
            }
            RequestClass::Metadata => {
                self.stale_while_revalidate(request, tiers.map_api_metadata.clone(), None)
                    .await
            }
            RequestClass::StaticAsset => self.cache_first(&request).await,
            RequestClass::ApiOnly => self.network_only(&request).await,
            RequestClass::Generic => self.network_first_with_cache_fallback(&request).await,
        };

        RoutedResponse::new(class, source, response)
    }

    /// Background refresh registry.
    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn fallback(&self) -> &FallbackResolver {
        &self.fallback
    }
}
