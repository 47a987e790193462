//! Test utilities for integration tests.
//!
//! This module provides a scripted fetcher that records the requests it sees,
//! plus helpers for building routers and reading response bodies.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use offline_map_proxy::cache::{CachedResponse, MemoryTierStore};
use offline_map_proxy::config::CacheConfig;
use offline_map_proxy::error::FetchError;
use offline_map_proxy::net::{FetchOptions, Fetcher, ProxyRequest};
use offline_map_proxy::router::CacheRouter;

// =============================================================================
// Mock Fetcher with Request Tracking
// =============================================================================

/// A scripted fetcher.
///
/// Responses are looked up by exact URL. Unknown URLs answer 404. In offline
/// mode every fetch fails with a connection error, as does any URL registered
/// with [`MockFetcher::with_failure`].
pub struct MockFetcher {
    responses: Mutex<HashMap<String, CachedResponse>>,
    failures: Mutex<Vec<String>>,
    panics: Mutex<Vec<String>>,
    offline: AtomicBool,
    delay: Option<Duration>,
    request_count: Arc<AtomicUsize>,
    requests: Mutex<Vec<(http::Method, String, FetchOptions)>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
            panics: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            delay: None,
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer `url` with `status` and `body`.
    pub fn with_response(self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.set_response(url, status, body);
        self
    }

    /// Answer `url` with a JSON body.
    pub fn with_json(self, url: &str, value: serde_json::Value) -> Self {
        let response = CachedResponse::new(
            200,
            vec![("content-type".to_string(), "application/json".to_string())],
            serde_json::to_vec(&value).unwrap(),
        );
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
        self
    }

    /// Fail every fetch of `url` with a connection error.
    pub fn with_failure(self, url: &str) -> Self {
        self.failures.lock().unwrap().push(url.to_string());
        self
    }

    /// Panic inside the fetch of `url`.
    pub fn with_panic(self, url: &str) -> Self {
        self.panics.lock().unwrap().push(url.to_string());
        self
    }

    /// Sleep before answering each fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_response(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) {
        let response = CachedResponse::new(status, vec![], body.into());
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// URLs fetched so far, in order.
    pub fn requested_urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, url, _)| url.clone())
            .collect()
    }

    /// Methods of the requests fetched so far, in order.
    pub fn requested_methods(&self) -> Vec<http::Method> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(method, _, _)| method.clone())
            .collect()
    }

    /// Options the given URL was last fetched with.
    pub fn options_for(&self, url: &str) -> Option<FetchOptions> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, u, _)| u == url)
            .map(|(_, _, options)| *options)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(
        &self,
        request: &ProxyRequest,
        options: FetchOptions,
    ) -> Result<CachedResponse, FetchError> {
        let url = request.url.to_string();
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((request.method.clone(), url.clone(), options));

        if self.panics.lock().unwrap().contains(&url) {
            panic!("scripted panic fetching {}", url);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) || self.failures.lock().unwrap().contains(&url) {
            return Err(FetchError::Connection(format!("{}: connection refused", url)));
        }

        let response = self.responses.lock().unwrap().get(&url).cloned();
        Ok(response.unwrap_or_else(|| CachedResponse::new(404, vec![], Vec::new())))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// A router over a fresh in-memory store.
pub fn memory_router(
    fetcher: MockFetcher,
    config: CacheConfig,
) -> (
    CacheRouter<MemoryTierStore, MockFetcher>,
    Arc<MemoryTierStore>,
    Arc<MockFetcher>,
) {
    let store = Arc::new(MemoryTierStore::new());
    let fetcher = Arc::new(fetcher);
    let router = CacheRouter::new(store.clone(), fetcher.clone(), Arc::new(config));
    (router, store, fetcher)
}

/// A GET request for `url`.
pub fn get(url: &str) -> ProxyRequest {
    ProxyRequest::get(url.parse().unwrap())
}

/// A GET request for `url` carrying browser navigation headers.
pub fn navigate(url: &str) -> ProxyRequest {
    let mut request = get(url);
    request
        .headers
        .insert("sec-fetch-mode", http::HeaderValue::from_static("navigate"));
    request
        .headers
        .insert("accept", http::HeaderValue::from_static("text/html"));
    request
}
