//! Cache router integration tests.
//!
//! Tests verify:
//! - Stale-while-revalidate hits, misses and offline misses
//! - Navigation fallback order and the offline document
//! - Tile tier bounding after background refreshes
//! - Pass-through and API requests are never cached

use offline_map_proxy::cache::{RequestIdentity, TierStore};
use offline_map_proxy::config::CacheConfig;
use offline_map_proxy::router::{RequestClass, ResponseSource};

use super::test_utils::{get, memory_router, navigate, MockFetcher};

const TILE: &str = "https://api.mapbox.com/v4/acme.terrain/3/4/2.png?access_token=T";
const STYLE: &str = "https://api.mapbox.com/styles/v1/acme/basic?access_token=T";

// =============================================================================
// Stale While Revalidate
// =============================================================================

#[tokio::test]
async fn test_tile_miss_offline_returns_json_503() {
    let fetcher = MockFetcher::new();
    fetcher.set_offline(true);
    let (router, _store, _fetcher) = memory_router(fetcher, CacheConfig::default());

    let routed = router.handle(get(TILE)).await;

    assert_eq!(routed.class, RequestClass::Tile);
    assert_eq!(routed.source, ResponseSource::Synthetic);
    assert_eq!(routed.response.status, 503);
    assert_eq!(routed.response.content_type(), Some("application/json"));

    let body: serde_json::Value = serde_json::from_slice(&routed.response.body).unwrap();
    assert_eq!(body, serde_json::json!({"error": "offline"}));
}

#[tokio::test]
async fn test_tile_miss_waits_for_network_and_caches() {
    let fetcher = MockFetcher::new().with_response(TILE, 200, b"tile-v1".to_vec());
    let (router, store, _fetcher) = memory_router(fetcher, CacheConfig::default());

    let routed = router.handle(get(TILE)).await;
    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(&routed.response.body[..], b"tile-v1");

    router.tasks().wait_idle().await;
    let tier = &router.config().tiers.tile_data;
    let cached = store.get(tier, &RequestIdentity::get(TILE)).await.unwrap();
    assert_eq!(&cached.unwrap().body[..], b"tile-v1");
}

#[tokio::test]
async fn test_tile_hit_served_stale_then_refreshed() {
    let fetcher = MockFetcher::new().with_response(TILE, 200, b"old".to_vec());
    let (router, store, fetcher) = memory_router(fetcher, CacheConfig::default());

    router.handle(get(TILE)).await;
    router.tasks().wait_idle().await;

    fetcher.set_response(TILE, 200, b"new".to_vec());
    let routed = router.handle(get(TILE)).await;
    let tier = router.config().tiers.tile_data.clone();
    assert_eq!(routed.source, ResponseSource::cache(tier.as_str()));
    assert_eq!(&routed.response.body[..], b"old");

    router.tasks().wait_idle().await;
    let cached = store.get(&tier, &RequestIdentity::get(TILE)).await.unwrap();
    assert_eq!(&cached.unwrap().body[..], b"new");
    assert_eq!(fetcher.request_count(), 2);
}

#[tokio::test]
async fn test_tile_hit_survives_going_offline() {
    let fetcher = MockFetcher::new().with_response(TILE, 200, b"tile".to_vec());
    let (router, _store, fetcher) = memory_router(fetcher, CacheConfig::default());

    router.handle(get(TILE)).await;
    router.tasks().wait_idle().await;

    fetcher.set_offline(true);
    let routed = router.handle(get(TILE)).await;
    assert_eq!(routed.response.status, 200);
    assert_eq!(&routed.response.body[..], b"tile");

    router.tasks().wait_idle().await;
    let again = router.handle(get(TILE)).await;
    assert_eq!(&again.response.body[..], b"tile");
}

#[tokio::test]
async fn test_failed_refresh_is_not_cached() {
    let fetcher = MockFetcher::new().with_response(STYLE, 500, b"boom".to_vec());
    let (router, store, _fetcher) = memory_router(fetcher, CacheConfig::default());

    let routed = router.handle(get(STYLE)).await;
    assert_eq!(routed.class, RequestClass::Metadata);
    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.status, 500);

    router.tasks().wait_idle().await;
    let tier = &router.config().tiers.map_api_metadata;
    assert_eq!(store.len(tier).await.unwrap(), 0);
}

#[tokio::test]
async fn test_tile_tier_bounded_after_refresh() {
    let mut fetcher = MockFetcher::new();
    let urls: Vec<String> = (0..5)
        .map(|x| format!("https://api.mapbox.com/v4/acme.terrain/3/{}/2.png", x))
        .collect();
    for url in &urls {
        fetcher = fetcher.with_response(url, 200, url.clone().into_bytes());
    }
    let config = CacheConfig::default().with_max_tile_entries(3);
    let (router, store, _fetcher) = memory_router(fetcher, config);

    for url in &urls {
        router.handle(get(url)).await;
        router.tasks().wait_idle().await;
    }

    let tier = &router.config().tiers.tile_data;
    let keys: Vec<String> = store
        .keys(tier)
        .await
        .unwrap()
        .into_iter()
        .map(|k| k.url)
        .collect();
    assert_eq!(keys, urls[2..].to_vec());
}

// =============================================================================
// Navigation
// =============================================================================

#[tokio::test]
async fn test_navigation_offline_without_cache_serves_offline_page() {
    let fetcher = MockFetcher::new();
    fetcher.set_offline(true);
    let (router, _store, _fetcher) = memory_router(fetcher, CacheConfig::default());

    let routed = router.handle(navigate("http://localhost/map")).await;

    assert_eq!(routed.class, RequestClass::Navigate);
    assert_eq!(routed.source, ResponseSource::Synthetic);
    assert_eq!(routed.response.status, 200);
    assert!(routed
        .response
        .content_type()
        .is_some_and(|ct| ct.starts_with("text/html")));

    let html = String::from_utf8(routed.response.body.to_vec()).unwrap();
    assert!(html.to_lowercase().contains("offline"));
    assert!(html.contains("location.reload()"));
}

#[tokio::test]
async fn test_navigation_online_stores_page_and_fallback() {
    let fetcher = MockFetcher::new().with_response("http://localhost/map", 200, b"<html>map</html>".to_vec());
    let (router, _store, fetcher) = memory_router(fetcher, CacheConfig::default());

    let online = router.handle(navigate("http://localhost/map")).await;
    assert_eq!(online.source, ResponseSource::Network);

    // Same page offline comes from its own entry
    fetcher.set_offline(true);
    let offline = router.handle(navigate("http://localhost/map")).await;
    let html_tier = router.config().tiers.page_html.clone();
    assert_eq!(offline.source, ResponseSource::cache(html_tier.as_str()));
    assert_eq!(&offline.response.body[..], b"<html>map</html>");

    // A page never visited falls back to the last good page
    let other = router.handle(navigate("http://localhost/settings")).await;
    assert_eq!(other.source, ResponseSource::cache(html_tier.as_str()));
    assert_eq!(&other.response.body[..], b"<html>map</html>");
}

#[tokio::test]
async fn test_navigation_error_status_returned_as_is() {
    let fetcher = MockFetcher::new().with_response("http://localhost/missing", 404, b"nope".to_vec());
    let (router, store, _fetcher) = memory_router(fetcher, CacheConfig::default());

    let routed = router.handle(navigate("http://localhost/missing")).await;
    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.status, 404);

    let html_tier = &router.config().tiers.page_html;
    assert_eq!(store.len(html_tier).await.unwrap(), 0);
}

// =============================================================================
// Other Classes
// =============================================================================

#[tokio::test]
async fn test_cdn_asset_cache_first() {
    let asset = "https://cdn.jsdelivr.net/npm/lib@1/lib.js";
    let fetcher = MockFetcher::new().with_response(asset, 200, b"js".to_vec());
    let (router, _store, fetcher) = memory_router(fetcher, CacheConfig::default());

    let first = router.handle(get(asset)).await;
    assert_eq!(first.class, RequestClass::StaticAsset);
    assert_eq!(first.source, ResponseSource::Network);

    let second = router.handle(get(asset)).await;
    assert!(matches!(second.source, ResponseSource::Cache { .. }));
    assert_eq!(fetcher.request_count(), 1);
}

#[tokio::test]
async fn test_cdn_asset_offline_miss_is_empty_503() {
    let fetcher = MockFetcher::new();
    fetcher.set_offline(true);
    let (router, _store, _fetcher) = memory_router(fetcher, CacheConfig::default());

    let routed = router.handle(get("https://unpkg.com/x.js")).await;
    assert_eq!(routed.response.status, 503);
    assert!(routed.response.body.is_empty());
}

#[tokio::test]
async fn test_api_requests_never_cached() {
    let api = "https://project.supabase.co/rest/v1/items";
    let fetcher = MockFetcher::new().with_response(api, 200, b"[]".to_vec());
    let (router, store, fetcher) = memory_router(fetcher, CacheConfig::default());

    let routed = router.handle(get(api)).await;
    assert_eq!(routed.class, RequestClass::ApiOnly);
    assert_eq!(routed.response.status, 200);
    for tier in router.config().tiers.names() {
        assert_eq!(store.len(tier).await.unwrap(), 0);
    }

    fetcher.set_offline(true);
    let offline = router.handle(get(api)).await;
    assert_eq!(offline.response.status, 503);
    assert_eq!(&offline.response.body[..], br#"{"error":"offline"}"#);
}

#[tokio::test]
async fn test_generic_falls_back_to_static_tier() {
    let url = "https://example.org/data.json";
    let fetcher = MockFetcher::new().with_response(url, 200, b"{}".to_vec());
    let (router, _store, fetcher) = memory_router(fetcher, CacheConfig::default());

    let online = router.handle(get(url)).await;
    assert_eq!(online.class, RequestClass::Generic);
    assert_eq!(online.source, ResponseSource::Network);

    fetcher.set_offline(true);
    let offline = router.handle(get(url)).await;
    assert!(matches!(offline.source, ResponseSource::Cache { .. }));
    assert_eq!(&offline.response.body[..], b"{}");
}

#[tokio::test]
async fn test_post_is_passthrough_and_uncached() {
    let url = "https://example.org/submit";
    let fetcher = MockFetcher::new().with_response(url, 201, Vec::new());
    let (router, store, _fetcher) = memory_router(fetcher, CacheConfig::default());

    let mut request = get(url);
    request.method = http::Method::POST;
    let routed = router.handle(request).await;

    assert_eq!(routed.class, RequestClass::Passthrough);
    assert_eq!(routed.source, ResponseSource::Passthrough);
    assert_eq!(routed.response.status, 201);
    assert!(store.tier_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_passthrough_failure_is_bad_gateway() {
    let fetcher = MockFetcher::new();
    fetcher.set_offline(true);
    let (router, _store, _fetcher) = memory_router(fetcher, CacheConfig::default());

    let mut request = get("https://example.org/submit");
    request.method = http::Method::POST;
    let routed = router.handle(request).await;
    assert_eq!(routed.response.status, 502);
}
