//! Offline fallback resolution for navigations.
//!
//! When a navigation cannot reach the network, the resolver walks the tiers
//! looking for the most specific page it can serve:
//!
//! 1. exact identity in any tier
//! 2. same URL under any method in any tier
//! 3. the page-html fallback key
//! 4. the first page-html entry
//! 5. any entry whose URL path ends in `/` or `.html`

use tracing::{debug, warn};

use crate::error::StorageError;

use super::identity::{CachedResponse, RequestIdentity};
use super::store::TierStore;
use super::tiers::TierSet;

/// Default application scope for the fallback key.
pub const DEFAULT_APP_SCOPE: &str = "http://localhost/";

/// Path segment of the fixed fallback key under the app scope.
pub const FALLBACK_KEY_PATH: &str = "offline-fallback";

/// Identity of the fallback page for `app_scope`.
pub fn fallback_identity(app_scope: &str) -> RequestIdentity {
    RequestIdentity::get(format!("{}{}", app_scope, FALLBACK_KEY_PATH))
}

/// A cached page found by the resolver, with the tier it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackHit {
    pub tier: String,
    pub response: CachedResponse,
}

/// Resolves a cached page for a navigation that failed.
#[derive(Debug, Clone)]
pub struct FallbackResolver {
    tiers: TierSet,
    fallback_key: RequestIdentity,
}

impl FallbackResolver {
    pub fn new(tiers: TierSet, app_scope: &str) -> Self {
        Self {
            tiers,
            fallback_key: fallback_identity(app_scope),
        }
    }

    /// The identity the navigation strategy stores its last good page under.
    pub fn fallback_key(&self) -> &RequestIdentity {
        &self.fallback_key
    }

    /// Return the first cached page matching the lookup order, if any.
    pub async fn resolve<S: TierStore + ?Sized>(
        &self,
        store: &S,
        identity: &RequestIdentity,
    ) -> Option<FallbackHit> {
        let tiers = self.search_order(store).await;

        for tier in &tiers {
            if let Some(found) = logged(tier, store.get(tier, identity).await) {
                debug!(tier = %tier, url = %identity.url, "Fallback: exact match");
                return hit(tier, found);
            }
        }

        for tier in &tiers {
            if let Some(found) = logged(tier, store.get_by_url(tier, &identity.url).await) {
                debug!(tier = %tier, url = %identity.url, "Fallback: URL match");
                return hit(tier, found);
            }
        }

        let html = &self.tiers.page_html;
        if let Some(found) = logged(html, store.get(html, &self.fallback_key).await) {
            debug!(url = %identity.url, "Fallback: offline-fallback key");
            return hit(html, found);
        }

        if let Some(first) =
            logged(html, store.keys(html).await.map(Some)).and_then(|k| k.into_iter().next())
        {
            if let Some(found) = logged(html, store.get(html, &first).await) {
                debug!(url = %identity.url, page = %first.url, "Fallback: first cached page");
                return hit(html, found);
            }
        }

        for tier in &tiers {
            let Some(keys) = logged(tier, store.keys(tier).await.map(Some)) else {
                continue;
            };
            for key in keys {
                let path = key.path();
                if !(path.ends_with('/') || path.ends_with(".html")) {
                    continue;
                }
                if let Some(found) = logged(tier, store.get(tier, &key).await) {
                    debug!(tier = %tier, page = %key.url, "Fallback: HTML-looking entry");
                    return hit(tier, found);
                }
            }
        }

        None
    }

    /// Current tiers first, then any other tier still present in the store.
    async fn search_order<S: TierStore + ?Sized>(&self, store: &S) -> Vec<String> {
        let mut order: Vec<String> = self.tiers.names().iter().map(|s| s.to_string()).collect();
        match store.tier_names().await {
            Ok(names) => order.extend(names.into_iter().filter(|n| !self.tiers.contains(n))),
            Err(e) => warn!(error = %e, "Failed to list cache tiers for fallback"),
        }
        order
    }
}

fn hit(tier: &str, response: CachedResponse) -> Option<FallbackHit> {
    Some(FallbackHit {
        tier: tier.to_string(),
        response,
    })
}

/// Treat storage errors as misses.
fn logged<T>(tier: &str, result: Result<Option<T>, StorageError>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(tier = %tier, error = %e, "Cache read failed during fallback");
            None
        }
    }
}
