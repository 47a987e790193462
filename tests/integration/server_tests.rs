//! HTTP server integration tests.
//!
//! Tests verify:
//! - Intercepted requests are routed and tagged with their source
//! - Control commands and their JSON replies
//! - Bearer-token protection of control commands
//! - Prefetch over HTTP, including conflicts and the SSE event stream

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use offline_map_proxy::cache::{MemoryTierStore, TierStore};
use offline_map_proxy::config::CacheConfig;
use offline_map_proxy::prefetch::PrefetchEvent;
use offline_map_proxy::{create_router, AppState, RouterConfig, SOURCE_HEADER};

use super::test_utils::MockFetcher;

const STYLE_URL: &str = "https://styles.example.com/basic/style.json";

fn state(fetcher: MockFetcher) -> (AppState, Arc<MemoryTierStore>) {
    let store = Arc::new(MemoryTierStore::new());
    let state = AppState::new(
        store.clone(),
        Arc::new(fetcher),
        Arc::new(CacheConfig::default()),
    );
    (state, store)
}

fn app(fetcher: MockFetcher) -> Router {
    let (state, _store) = state(fetcher);
    create_router(state, RouterConfig::new().with_tracing(false))
}

fn app_with_fetcher(fetcher: MockFetcher, config: RouterConfig) -> (Router, Arc<MockFetcher>) {
    let fetcher = Arc::new(fetcher);
    let state = AppState::new(
        Arc::new(MemoryTierStore::new()),
        fetcher.clone(),
        Arc::new(CacheConfig::default()),
    );
    (create_router(state, config.with_tracing(false)), fetcher)
}

fn style_fetcher() -> MockFetcher {
    MockFetcher::new().with_json(
        STYLE_URL,
        json!({"sources": {"base": {"tiles": ["https://tiles.example.com/{z}/{x}/{y}.png"]}}}),
    )
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn prefetch_body(area_name: &str) -> Body {
    Body::from(
        json!({
            "areaName": area_name,
            "bbox": [-180.0, -85.0, 180.0, 85.0],
            "minZoom": 1,
            "maxZoom": 1,
            "styleUrl": STYLE_URL
        })
        .to_string(),
    )
}

fn post(uri: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap()
}

// =============================================================================
// Health and Proxy
// =============================================================================

#[tokio::test]
async fn test_health() {
    let response = app(MockFetcher::new())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_proxy_absolute_form_tile() {
    let tile = "https://api.mapbox.com/v4/acme.terrain/1/0/0.png";
    let app = app(MockFetcher::new().with_response(tile, 200, b"png".to_vec()));

    let response = app
        .oneshot(Request::builder().uri(tile).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[SOURCE_HEADER], "network");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"png");
}

#[tokio::test]
async fn test_proxy_offline_navigation_via_host_header() {
    let fetcher = MockFetcher::new();
    fetcher.set_offline(true);
    let app = app(fetcher);

    let request = Request::builder()
        .uri("/map")
        .header("host", "localhost")
        .header("sec-fetch-mode", "navigate")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[SOURCE_HEADER], "synthetic");
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
}

#[tokio::test]
async fn test_proxy_offline_tile_is_json_503() {
    let fetcher = MockFetcher::new();
    fetcher.set_offline(true);

    let response = app(fetcher)
        .oneshot(
            Request::builder()
                .uri("https://api.mapbox.com/v4/acme.terrain/1/0/0.png")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await, json!({"error": "offline"}));
}

#[tokio::test]
async fn test_upstream_preflight_passes_through() {
    let api = "https://xyz.supabase.co/rest/v1/orders";
    let (app, fetcher) =
        app_with_fetcher(MockFetcher::new().with_response(api, 204, Vec::new()), RouterConfig::new());

    let request = Request::builder()
        .method("OPTIONS")
        .uri(api)
        .header("origin", "https://app.example.com")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "apikey")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()[SOURCE_HEADER], "passthrough");
    assert!(!response.headers().contains_key("access-control-allow-origin"));
    assert!(!response.headers().contains_key("access-control-allow-headers"));
    assert_eq!(fetcher.requested_methods(), vec![http::Method::OPTIONS]);
}

#[tokio::test]
async fn test_proxied_response_headers_untouched() {
    let tile = "https://api.mapbox.com/v4/acme.terrain/1/0/0.png";
    let (app, fetcher) = app_with_fetcher(
        MockFetcher::new().with_response(tile, 200, b"png".to_vec()),
        RouterConfig::new(),
    );

    let request = Request::builder()
        .uri(tile)
        .header("origin", "https://app.example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key("access-control-allow-origin"));
    assert!(!response.headers().contains_key("vary"));
    assert_eq!(fetcher.request_count(), 1);
}

#[tokio::test]
async fn test_control_routes_answer_cors_preflight() {
    let (app, fetcher) = app_with_fetcher(MockFetcher::new(), RouterConfig::new());

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/_offline/version")
        .header("origin", "https://app.example.com")
        .header("access-control-request-method", "GET")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(fetcher.request_count(), 0);
}

#[tokio::test]
async fn test_absolute_form_local_paths_are_intercepted() {
    let health = "https://backend.example.org/health";
    let control = "https://backend.example.org/_offline/version";
    let fetcher = MockFetcher::new()
        .with_response(health, 200, b"upstream health".to_vec())
        .with_response(control, 200, b"upstream control".to_vec());
    let (app, fetcher) = app_with_fetcher(fetcher, RouterConfig::new().with_control_token("s3cret"));

    let response = app
        .clone()
        .oneshot(Request::builder().uri(health).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[SOURCE_HEADER], "network");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"upstream health");

    // No control token needed: this is upstream traffic
    let response = app
        .oneshot(Request::builder().uri(control).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"upstream control");

    assert_eq!(fetcher.requested_urls(), vec![health, control]);
}

// =============================================================================
// Control Commands
// =============================================================================

#[tokio::test]
async fn test_version_reports_tiers() {
    let response = app(MockFetcher::new())
        .oneshot(
            Request::builder()
                .uri("/_offline/version")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["tiers"]["tileData"], "tile-data-v1");
    assert_eq!(body["tiers"]["pageHtml"], "page-html-v3");
}

#[tokio::test]
async fn test_activate_and_tiers() {
    let (state, store) = state(MockFetcher::new());
    store.open("tile-data-v0").await.unwrap();
    let app = create_router(state, RouterConfig::new().with_tracing(false));

    let response = app
        .clone()
        .oneshot(post("/_offline/activate", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"deleted": ["tile-data-v0"]}));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/_offline/tiers")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["tiers"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_unknown_control_command_is_404() {
    let response = app(MockFetcher::new())
        .oneshot(
            Request::builder()
                .uri("/_offline/skip-waiting")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not_found");
}

#[tokio::test]
async fn test_cancel_without_job_is_404() {
    let request = Request::builder()
        .method("DELETE")
        .uri("/_offline/prefetch/nowhere")
        .body(Body::empty())
        .unwrap();
    let response = app(MockFetcher::new()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_control_token_required() {
    let (state, _store) = state(MockFetcher::new());
    let app = create_router(
        state,
        RouterConfig::new()
            .with_control_token("s3cret")
            .with_tracing(false),
    );

    let missing = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/_offline/version")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(missing).await["error"], "missing_token");

    let wrong = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/_offline/version")
                .header("authorization", "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/_offline/version")
                .header("authorization", "Bearer s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    // Health and intercepted requests need no token
    let health = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}

// =============================================================================
// Prefetch over HTTP
// =============================================================================

#[tokio::test]
async fn test_prefetch_wait_returns_summary() {
    let response = app(style_fetcher())
        .oneshot(post("/_offline/prefetch?wait=true", prefetch_body("world")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["areaName"], "world");
    assert_eq!(body["total"], 5);
    assert_eq!(body["cached"], 1);
    assert_eq!(body["failed"], 4);
    assert_eq!(body["cancelled"], false);
}

#[tokio::test]
async fn test_prefetch_without_wait_is_accepted() {
    let response = app(style_fetcher())
        .oneshot(post("/_offline/prefetch", prefetch_body("world")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["status"], "accepted");
}

#[tokio::test]
async fn test_prefetch_invalid_area_is_400() {
    let body = Body::from(
        json!({
            "areaName": "",
            "bbox": [0.0, 0.0, 1.0, 1.0],
            "minZoom": 1,
            "maxZoom": 1,
            "styleUrl": STYLE_URL
        })
        .to_string(),
    );
    let response = app(style_fetcher())
        .oneshot(post("/_offline/prefetch?wait=true", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_area");
}

#[tokio::test]
async fn test_prefetch_duplicate_area_conflicts() {
    let fetcher = style_fetcher().with_delay(Duration::from_millis(20));
    let app = app(fetcher);

    let first = app
        .clone()
        .oneshot(post("/_offline/prefetch", prefetch_body("world")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = app
        .oneshot(post("/_offline/prefetch", prefetch_body("world")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["error"], "already_running");
}

#[tokio::test]
async fn test_events_stream_delivers_prefetch_events() {
    let (state, _store) = state(MockFetcher::new());
    let events = state.events().clone();
    let app = create_router(state, RouterConfig::new().with_tracing(false));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/_offline/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    events.publish(PrefetchEvent::Complete {
        area_name: "world".to_string(),
        cached: 5,
        failed: 0,
        total: 5,
        cancelled: false,
    });

    let mut body = response.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(1), body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: complete"));
    assert!(text.contains("\"areaName\":\"world\""));
}
