//! Area prefetch job.
//!
//! Downloads every tile of a bounding box across a zoom range, plus the style
//! descriptor and its sprites, so the area renders offline.
//!
//! ```text
//! PrefetchCommand
//!   1. validate bbox / zoom range
//!   2. resolve style reference ──► descriptor URL
//!   3. fetch + persist descriptor (metadata tier)
//!   4. templates × tiles(z) ∪ descriptor ∪ sprites ──► work list
//!   5. N workers pop from a shared queue until empty or cancelled
//!   6. progress every 25 completions and at the last one
//!   7. completion event ──► PrefetchSummary
//! ```
//!
//! Failures in steps 1-4 abort the job with an error event. Failures of
//! individual downloads only lower the cached count.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{RequestIdentity, TierStore};
use crate::config::CacheConfig;
use crate::error::PrefetchError;
use crate::net::{FetchOptions, Fetcher, ProxyRequest};
use crate::router::{provider_class, RequestClass};
use crate::tile::{tile_range, BoundingBox, StyleResolver, MAX_ZOOM};

use super::events::{percent, EventBus, PrefetchEvent};

/// Default worker pool width.
pub const DEFAULT_PREFETCH_CONCURRENCY: usize = 10;

/// A progress event is emitted every this many completions.
pub const PROGRESS_INTERVAL: usize = 25;

// =============================================================================
// Command and Summary
// =============================================================================

/// Request to prefetch an area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchCommand {
    /// Label used to correlate progress events
    pub area_name: String,

    /// `[west, south, east, north]`
    pub bbox: BoundingBox,

    pub min_zoom: u8,

    pub max_zoom: u8,

    /// Provider-scheme style reference or absolute descriptor URL
    pub style_url: String,

    /// Credential token for the map provider
    #[serde(default)]
    pub access_token: Option<String>,
}

impl PrefetchCommand {
    /// Check the area before any network work.
    pub fn validate(&self) -> Result<(), PrefetchError> {
        let invalid = |reason: &str| {
            Err(PrefetchError::InvalidArea {
                reason: reason.to_string(),
            })
        };

        if self.area_name.trim().is_empty() {
            return invalid("area name must not be empty");
        }
        if !self.bbox.is_finite() {
            return invalid("bounding box values must be finite");
        }
        if !self.bbox.is_well_formed() {
            return invalid("bounding box must have west < east and south < north");
        }
        if self.min_zoom > self.max_zoom {
            return invalid("minZoom must not exceed maxZoom");
        }
        if self.max_zoom > MAX_ZOOM {
            return Err(PrefetchError::InvalidArea {
                reason: format!("maxZoom must not exceed {}", MAX_ZOOM),
            });
        }
        Ok(())
    }
}

/// Final counts of a prefetch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchSummary {
    pub area_name: String,
    pub cached: usize,
    pub failed: usize,
    pub total: usize,
    pub cancelled: bool,
}

// =============================================================================
// Area Prefetch Job
// =============================================================================

/// Runs area prefetches against a tier store.
///
/// # Type Parameters
///
/// * `S` - Tier store
/// * `F` - Network fetcher
pub struct AreaPrefetchJob<S: ?Sized = dyn TierStore, F: ?Sized = dyn Fetcher> {
    store: Arc<S>,
    fetcher: Arc<F>,
    config: Arc<CacheConfig>,
    resolver: StyleResolver,
    events: EventBus,
}

/// Shared state of one pool run.
struct Pool<'a> {
    area_name: &'a str,
    queue: Mutex<VecDeque<String>>,
    total: usize,
    completed: AtomicUsize,
    cached: AtomicUsize,
    cancel: &'a CancellationToken,
}

impl Pool<'_> {
    fn pop(&self) -> Option<String> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }
}

impl<S, F> AreaPrefetchJob<S, F>
where
    S: TierStore + ?Sized + 'static,
    F: Fetcher + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, fetcher: Arc<F>, config: Arc<CacheConfig>, events: EventBus) -> Self {
        let resolver = StyleResolver::new(
            config.provider_scheme.clone(),
            config.provider_api_base.clone(),
            config.provider_host.clone(),
        );
        Self {
            store,
            fetcher,
            config,
            resolver,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run a prefetch to completion (or cancellation).
    ///
    /// Errors before the download phase are broadcast as an error event and
    /// returned.
    pub async fn run(
        &self,
        command: &PrefetchCommand,
        cancel: CancellationToken,
    ) -> Result<PrefetchSummary, PrefetchError> {
        let urls = match self.build_work_list(command).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!(area = %command.area_name, error = %e, "Area prefetch failed");
                self.events.publish(PrefetchEvent::Error {
                    area_name: command.area_name.clone(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        info!(
            area = %command.area_name,
            urls = urls.len(),
            min_zoom = command.min_zoom,
            max_zoom = command.max_zoom,
            "Starting area prefetch"
        );

        let summary = self.download(&command.area_name, urls, &cancel).await;

        info!(
            area = %summary.area_name,
            cached = summary.cached,
            failed = summary.failed,
            total = summary.total,
            cancelled = summary.cancelled,
            "Area prefetch finished"
        );

        self.events.publish(PrefetchEvent::Complete {
            area_name: summary.area_name.clone(),
            cached: summary.cached,
            failed: summary.failed,
            total: summary.total,
            cancelled: summary.cancelled,
        });

        Ok(summary)
    }

    /// Steps 1-4: everything that may abort the job.
    async fn build_work_list(&self, command: &PrefetchCommand) -> Result<Vec<String>, PrefetchError> {
        command.validate()?;
        let token = command.access_token.as_deref();

        let descriptor_url = self.resolver.resolve_style_url(&command.style_url, token)?;
        let request = ProxyRequest::get(descriptor_url.clone());
        let response = self.fetcher.fetch(&request, FetchOptions::prefetch()).await?;
        if !response.is_success() {
            return Err(PrefetchError::DescriptorStatus {
                status: response.status,
            });
        }

        let descriptor: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|e| PrefetchError::DescriptorParse(e.to_string()))?;

        self.store
            .put(
                &self.config.tiers.map_api_metadata,
                &request.identity(),
                &response,
            )
            .await?;

        let templates = self.resolver.tile_templates(&descriptor);
        let sprites = self.resolver.sprite_urls(&descriptor, token);
        debug!(
            area = %command.area_name,
            templates = templates.len(),
            sprites = sprites.len(),
            "Parsed style descriptor"
        );

        let mut urls = Vec::new();
        for zoom in command.min_zoom..=command.max_zoom {
            for tile in tile_range(&command.bbox, zoom).iter() {
                urls.extend(
                    templates
                        .iter()
                        .filter_map(|template| self.resolver.tile_url(template, tile, token)),
                );
            }
        }
        urls.push(descriptor_url.to_string());
        urls.extend(sprites);

        Ok(dedup_in_order(urls))
    }

    /// Steps 5-6: the bounded worker pool.
    async fn download(
        &self,
        area_name: &str,
        urls: Vec<String>,
        cancel: &CancellationToken,
    ) -> PrefetchSummary {
        let pool = Pool {
            area_name,
            total: urls.len(),
            queue: Mutex::new(VecDeque::from(urls)),
            completed: AtomicUsize::new(0),
            cached: AtomicUsize::new(0),
            cancel,
        };

        let width = self.config.prefetch_concurrency.clamp(1, pool.total.max(1));
        join_all((0..width).map(|_| self.worker(&pool))).await;

        let completed = pool.completed.load(Ordering::SeqCst);
        let cached = pool.cached.load(Ordering::SeqCst);
        PrefetchSummary {
            area_name: area_name.to_string(),
            cached,
            failed: completed - cached,
            total: pool.total,
            cancelled: completed < pool.total,
        }
    }

    async fn worker(&self, pool: &Pool<'_>) {
        while let Some(url) = pool.pop() {
            if self.fetch_and_store(&url).await {
                pool.cached.fetch_add(1, Ordering::SeqCst);
            }

            let completed = pool.completed.fetch_add(1, Ordering::SeqCst) + 1;
            if completed % PROGRESS_INTERVAL == 0 || completed == pool.total {
                self.events.publish(PrefetchEvent::Progress {
                    area_name: pool.area_name.to_string(),
                    completed,
                    total: pool.total,
                    percent: percent(completed, pool.total),
                });
            }
        }
    }

    /// Download one URL into the tile or metadata tier. Returns whether it was cached.
    async fn fetch_and_store(&self, url: &str) -> bool {
        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(e) => {
                debug!(url, error = %e, "Skipping unparseable prefetch URL");
                return false;
            }
        };

        let tier = match provider_class(url.path()) {
            RequestClass::Tile => &self.config.tiers.tile_data,
            _ => &self.config.tiers.map_api_metadata,
        };

        let request = ProxyRequest::get(url);
        let response = match self.fetcher.fetch(&request, FetchOptions::prefetch()).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                debug!(url = %request.url, status = response.status, "Prefetch download rejected");
                return false;
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Prefetch download failed");
                return false;
            }
        };

        let identity = RequestIdentity::get(request.url.as_str());
        match self.store.put(tier, &identity, &response).await {
            Ok(()) => true,
            Err(e) => {
                warn!(tier = %tier, url = %identity.url, error = %e, "Failed to store prefetched resource");
                false
            }
        }
    }
}

/// Drop repeated URLs, keeping first occurrences in order.
fn dedup_in_order(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(urls.len());
    urls.into_iter()
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
