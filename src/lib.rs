//! # Offline Map Proxy
//!
//! An offline-first caching proxy for map-based web applications.
//!
//! The proxy sits between a map application and the network. It classifies
//! each intercepted request, serves it through a caching strategy backed by
//! versioned cache tiers, and keeps working when the network is gone: tiles and
//! style metadata come from cache, pages fall back to the best cached copy, and
//! everything else degrades to a synthetic offline response.
//!
//! ## Features
//!
//! - **Strategy routing**: network-first for pages, stale-while-revalidate for
//!   tiles and style metadata, cache-first for CDN assets, network-only for
//!   backend APIs
//! - **Persistent tiers**: SQLite-backed named tiers with version tags and
//!   activation-time cleanup
//! - **Bounded tile cache**: insertion-order eviction of the tile tier
//! - **Area prefetch**: downloads every tile of a bounding box and zoom range
//!   with bounded concurrency, cancellation and progress events
//!
//! ## Architecture
//!
//! - [`router`] - Request classification and caching strategies
//! - [`cache`] - Tier stores, size bounding and offline fallback
//! - [`tile`] - Web Mercator tile math and style descriptor resolution
//! - [`prefetch`] - Area prefetch jobs and their event bus
//! - [`lifecycle`] - Install, activate and cache-page commands
//! - [`net`] - Upstream fetching
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use offline_map_proxy::{create_router, AppState, CacheConfig, MemoryTierStore, ReqwestFetcher, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryTierStore::new());
//!     let fetcher = Arc::new(ReqwestFetcher::new(Duration::from_secs(30)).unwrap());
//!     let state = AppState::new(store, fetcher, Arc::new(CacheConfig::default()));
//!
//!     let router = create_router(state, RouterConfig::new());
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod prefetch;
pub mod router;
pub mod server;
pub mod tile;

// Re-export commonly used types
pub use cache::{
    fallback_identity, limit_tier_size, CachedResponse, FallbackResolver, MemoryTierStore,
    RequestIdentity, SqliteTierStore, TierSet, TierStore,
};
pub use config::{CacheConfig, Config};
pub use error::{FetchError, PrefetchError, StorageError, StyleError};
pub use lifecycle::{InstallReport, Lifecycle, TierStats, VersionReport};
pub use net::{FetchOptions, Fetcher, ProxyRequest, ReqwestFetcher};
pub use prefetch::{
    AreaPrefetchJob, EventBus, PrefetchCommand, PrefetchEvent, PrefetchManager, PrefetchSummary,
};
pub use router::{CacheRouter, RequestClass, ResponseSource, RoutedResponse, SOURCE_HEADER};
pub use server::{create_router, AppState, ErrorResponse, RouterConfig};
pub use tile::{
    lat_to_tile_y, lon_to_tile_x, tile_range, tiles_in_bbox, BoundingBox, StyleResolver,
    TileCoordinate, TileRange,
};
