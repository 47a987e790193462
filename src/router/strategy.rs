//! The caching strategies behind [`CacheRouter::handle`].

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::{limit_tier_size, CachedResponse, RequestIdentity, TierStore};
use crate::error::StorageError;
use crate::net::{FetchOptions, Fetcher, ProxyRequest};

use super::synthetic::{bad_gateway, offline_json, offline_page, unavailable};
use super::{CacheRouter, ResponseSource};

type Served = (ResponseSource, CachedResponse);

/// Storage read errors are misses.
fn read_or_miss(
    tier: &str,
    url: &str,
    result: Result<Option<CachedResponse>, StorageError>,
) -> Option<CachedResponse> {
    result.unwrap_or_else(|e| {
        warn!(tier, url, error = %e, "Cache read failed, treating as miss");
        None
    })
}

/// Store a 2xx response; write errors are logged, never surfaced.
async fn store_success<S: TierStore + ?Sized>(
    store: &S,
    tier: &str,
    identity: &RequestIdentity,
    response: &CachedResponse,
) {
    if !response.is_success() {
        return;
    }
    if let Err(e) = store.put(tier, identity, response).await {
        warn!(tier, url = %identity.url, error = %e, "Cache write failed");
    }
}

impl<S, F> CacheRouter<S, F>
where
    S: TierStore + ?Sized + 'static,
    F: Fetcher + ?Sized + 'static,
{
    /// Forward verbatim; a transport failure becomes a 502.
    pub(super) async fn passthrough(&self, request: &ProxyRequest) -> Served {
        match self.fetcher.fetch(request, FetchOptions::default()).await {
            Ok(response) => (ResponseSource::Passthrough, response),
            Err(e) => {
                warn!(method = %request.method, url = %request.url, error = %e, "Pass-through failed");
                (ResponseSource::Synthetic, bad_gateway(&e.to_string()))
            }
        }
    }

    /// Navigation: network first, then the fallback resolver, then the
    /// offline page.
    pub(super) async fn network_first_with_fallback(&self, request: &ProxyRequest) -> Served {
        let identity = request.identity();
        let html_tier = &self.config.tiers.page_html;

        match self.fetcher.fetch(request, FetchOptions::default()).await {
            Ok(response) if response.is_success() => {
                let stored = match self
                    .store
                    .put(html_tier, &identity, &response)
                    .await
                {
                    Ok(()) => {
                        self.store
                            .put(html_tier, self.fallback.fallback_key(), &response)
                            .await
                    }
                    Err(e) => Err(e),
                };

                match stored {
                    Ok(()) => return (ResponseSource::Network, response),
                    Err(e) => {
                        warn!(url = %identity.url, error = %e, "Failed to store page, using offline fallback");
                    }
                }
            }
            Ok(response) => return (ResponseSource::Network, response),
            Err(e) => {
                info!(url = %identity.url, error = %e, "Navigation failed, using offline fallback");
            }
        }

        match self.fallback.resolve(self.store.as_ref(), &identity).await {
            Some(hit) => (ResponseSource::cache(hit.tier), hit.response),
            None => {
                debug!(url = %identity.url, "No cached page, serving offline document");
                (ResponseSource::Synthetic, offline_page())
            }
        }
    }

    /// Tiles and metadata: serve the cached copy if any and refresh in the
    /// background; on a miss wait for the refresh.
    pub(super) async fn stale_while_revalidate(
        &self,
        request: ProxyRequest,
        tier: String,
        max_entries: Option<usize>,
    ) -> Served {
        let identity = request.identity();
        let cached = read_or_miss(&tier, &identity.url, self.store.get(&tier, &identity).await);

        let (tx, rx) = oneshot::channel();
        let store = self.store.clone();
        let fetcher = self.fetcher.clone();
        let refresh_tier = tier.clone();
        self.tasks.spawn(async move {
            let result = fetcher.fetch(&request, FetchOptions::default()).await;
            if let Ok(response) = &result {
                store_success(store.as_ref(), &refresh_tier, &identity, response).await;
            }
            let refreshed = result.as_ref().is_ok_and(CachedResponse::is_success);
            let _ = tx.send(result);

            if let (true, Some(max)) = (refreshed, max_entries) {
                match limit_tier_size(store.as_ref(), &refresh_tier, max).await {
                    Ok(0) => {}
                    Ok(evicted) => debug!(tier = %refresh_tier, evicted, "Evicted old tiles"),
                    Err(e) => warn!(tier = %refresh_tier, error = %e, "Failed to bound tier"),
                }
            }
        });

        if let Some(hit) = cached {
            return (ResponseSource::cache(tier), hit);
        }

        match rx.await {
            Ok(Ok(response)) => (ResponseSource::Network, response),
            Ok(Err(e)) => {
                debug!(tier = %tier, error = %e, "Refresh failed on cache miss");
                (ResponseSource::Synthetic, offline_json())
            }
            Err(_) => (ResponseSource::Synthetic, offline_json()),
        }
    }

    /// Static CDN assets: cache first, then network.
    pub(super) async fn cache_first(&self, request: &ProxyRequest) -> Served {
        let identity = request.identity();
        let tier = &self.config.tiers.static_assets;

        if let Some(hit) = read_or_miss(tier, &identity.url, self.store.get(tier, &identity).await)
        {
            return (ResponseSource::cache(tier.as_str()), hit);
        }

        match self.fetcher.fetch(request, FetchOptions::default()).await {
            Ok(response) => {
                store_success(self.store.as_ref(), tier, &identity, &response).await;
                (ResponseSource::Network, response)
            }
            Err(e) => {
                debug!(url = %identity.url, error = %e, "CDN asset unavailable offline");
                (ResponseSource::Synthetic, unavailable())
            }
        }
    }

    /// Backend API: never cached.
    pub(super) async fn network_only(&self, request: &ProxyRequest) -> Served {
        match self.fetcher.fetch(request, FetchOptions::default()).await {
            Ok(response) => (ResponseSource::Network, response),
            Err(e) => {
                debug!(url = %request.url, error = %e, "API unavailable offline");
                (ResponseSource::Synthetic, offline_json())
            }
        }
    }

    /// Everything else: network first, then the static tier.
    pub(super) async fn network_first_with_cache_fallback(&self, request: &ProxyRequest) -> Served {
        let identity = request.identity();
        let tier = &self.config.tiers.static_assets;

        match self.fetcher.fetch(request, FetchOptions::default()).await {
            Ok(response) => {
                store_success(self.store.as_ref(), tier, &identity, &response).await;
                (ResponseSource::Network, response)
            }
            Err(e) => {
                debug!(url = %identity.url, error = %e, "Network failed, trying static tier");
                match read_or_miss(tier, &identity.url, self.store.get(tier, &identity).await) {
                    Some(hit) => (ResponseSource::cache(tier.as_str()), hit),
                    None => (ResponseSource::Synthetic, offline_json()),
                }
            }
        }
    }
}
