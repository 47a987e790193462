//! Install, activation and page-caching commands.
//!
//! - **install**: warm the static asset list and the application page
//! - **activate**: delete tiers left over from older versions
//! - **cache-page**: re-fetch the application page into the HTML tier

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{collect_obsolete, CachedResponse, RequestIdentity, TierSet, TierStore};
use crate::config::CacheConfig;
use crate::error::{FetchError, StorageError};
use crate::net::{FetchOptions, Fetcher, ProxyRequest};

/// Outcome of an install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    /// Static assets stored
    pub warmed: usize,
    /// Static assets that could not be fetched or stored
    pub warm_failed: usize,
    /// Whether the application page was cached
    pub page_cached: bool,
}

/// Current version and tier names.
#[derive(Debug, Clone, Serialize)]
pub struct VersionReport {
    pub version: &'static str,
    pub tiers: TierSet,
}

/// Entry count of one stored tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub name: String,
    pub entries: usize,
    pub current: bool,
}

/// Lifecycle commands over a store and a fetcher.
pub struct Lifecycle<S: ?Sized = dyn TierStore, F: ?Sized = dyn Fetcher> {
    store: Arc<S>,
    fetcher: Arc<F>,
    config: Arc<CacheConfig>,
}

impl<S: ?Sized, F: ?Sized> Clone for Lifecycle<S, F> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            fetcher: self.fetcher.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S, F> Lifecycle<S, F>
where
    S: TierStore + ?Sized,
    F: Fetcher + ?Sized,
{
    pub fn new(store: Arc<S>, fetcher: Arc<F>, config: Arc<CacheConfig>) -> Self {
        Self {
            store,
            fetcher,
            config,
        }
    }

    /// Warm static assets and the application page. Individual failures are
    /// logged and counted.
    pub async fn install(&self) -> InstallReport {
        let mut report = InstallReport::default();
        let tier = &self.config.tiers.static_assets;

        for url in &self.config.warm_urls {
            match self.fetch_success(url, FetchOptions::default()).await {
                Some(response) => {
                    match self.store.put(tier, &RequestIdentity::get(url.as_str()), &response).await {
                        Ok(()) => {
                            debug!(url = %url, "Warmed static asset");
                            report.warmed += 1;
                        }
                        Err(e) => {
                            warn!(url = %url, error = %e, "Failed to store static asset");
                            report.warm_failed += 1;
                        }
                    }
                }
                None => report.warm_failed += 1,
            }
        }

        let scope = &self.config.app_scope;
        let page = self
            .fetch_success(
                scope,
                FetchOptions {
                    bypass_cache: true,
                    ..FetchOptions::default()
                },
            )
            .await;
        if let Some(page) = page {
            let keys = [scope.clone(), format!("{}index.html", scope)];
            report.page_cached = self.store_page(&keys, &page).await;
        }

        info!(
            warmed = report.warmed,
            failed = report.warm_failed,
            page_cached = report.page_cached,
            "Install finished"
        );
        report
    }

    /// Delete obsolete tiers and make sure the current ones exist.
    pub async fn activate(&self) -> Result<Vec<String>, StorageError> {
        let deleted = collect_obsolete(self.store.as_ref(), &self.config.tiers).await?;
        for name in self.config.tiers.names() {
            self.store.open(name).await?;
        }
        info!(deleted = deleted.len(), "Activation finished");
        Ok(deleted)
    }

    /// Re-fetch the application page into the HTML tier.
    ///
    /// Returns whether the page was stored; a non-2xx answer is not an error.
    pub async fn cache_current_page(&self) -> Result<bool, FetchError> {
        let scope = &self.config.app_scope;
        let url = parse_url(scope)?;
        let response = self
            .fetcher
            .fetch(&ProxyRequest::get(url), FetchOptions::default())
            .await?;

        if !response.is_success() {
            warn!(url = %scope, status = response.status, "Application page not cacheable");
            return Ok(false);
        }
        Ok(self.store_page(&[scope.clone()], &response).await)
    }

    pub fn version(&self) -> VersionReport {
        VersionReport {
            version: env!("CARGO_PKG_VERSION"),
            tiers: self.config.tiers.clone(),
        }
    }

    /// Entry count of every stored tier.
    pub async fn tier_stats(&self) -> Result<Vec<TierStats>, StorageError> {
        let mut stats = Vec::new();
        for name in self.store.tier_names().await? {
            let entries = self.store.len(&name).await?;
            stats.push(TierStats {
                current: self.config.tiers.contains(&name),
                name,
                entries,
            });
        }
        Ok(stats)
    }

    /// Store `page` under each URL in `keys` and under the fallback key.
    async fn store_page(&self, keys: &[String], page: &CachedResponse) -> bool {
        let tier = &self.config.tiers.page_html;
        let fallback = crate::cache::fallback_identity(&self.config.app_scope);
        let identities = keys
            .iter()
            .map(|url| RequestIdentity::get(url.as_str()))
            .chain(std::iter::once(fallback));

        let mut stored = true;
        for identity in identities {
            if let Err(e) = self.store.put(tier, &identity, page).await {
                warn!(url = %identity.url, error = %e, "Failed to store application page");
                stored = false;
            }
        }
        stored
    }

    async fn fetch_success(&self, url: &str, options: FetchOptions) -> Option<CachedResponse> {
        let request = match parse_url(url) {
            Ok(url) => ProxyRequest::get(url),
            Err(e) => {
                warn!(url, error = %e, "Skipping invalid URL");
                return None;
            }
        };

        match self.fetcher.fetch(&request, options).await {
            Ok(response) if response.is_success() => Some(response),
            Ok(response) => {
                warn!(url, status = response.status, "Non-success response, not caching");
                None
            }
            Err(e) => {
                warn!(url, error = %e, "Fetch failed, not caching");
                None
            }
        }
    }
}

fn parse_url(url: &str) -> Result<Url, FetchError> {
    Url::parse(url).map_err(|e| FetchError::InvalidRequest(format!("{}: {}", url, e)))
}
