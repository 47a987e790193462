//! Router configuration for the offline map proxy.
//!
//! # Route Structure
//!
//! ```text
//! /health                         - Health check (public)
//! /_offline/version               - Current tier set
//! /_offline/prefetch              - Start (POST) or list (GET) area prefetches
//! /_offline/prefetch/{area}       - Cancel a prefetch (DELETE)
//! /_offline/events                - Prefetch events (SSE)
//! /_offline/install               - Warm static assets and the app page
//! /_offline/activate              - Delete obsolete tiers
//! /_offline/cache-page            - Re-cache the app page
//! /_offline/tiers                 - Entry count per tier
//! anything else                   - Intercepted request, served by the cache router
//! ```
//!
//! Absolute-form requests (`GET https://host/path`) are always intercepted
//! requests, whatever their path.
//!
//! Control routes require a bearer token when one is configured.
//!
//! # Example
//!
//! ```ignore
//! use offline_map_proxy::server::{create_router, AppState, RouterConfig};
//!
//! let state = AppState::new(store, fetcher, Arc::new(CacheConfig::default()));
//! let config = RouterConfig::new().with_control_token("secret");
//! let router = create_router(state, config);
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::{auth_middleware, ControlToken};
use super::handlers::{
    absolute_form_middleware, activate_handler, cache_page_handler, cancel_handler,
    control_not_found_handler, events_handler, health_handler, install_handler, prefetch_handler,
    proxy_handler, running_handler, tiers_handler, version_handler, AppState,
};

/// Path prefix reserved for control commands.
pub const CONTROL_PREFIX: &str = "/_offline";

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Clone)]
pub struct RouterConfig {
    /// Bearer token for control commands (None = control commands are open)
    pub control_token: Option<String>,

    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Create a new router configuration.
    ///
    /// By default:
    /// - Control commands need no token
    /// - CORS allows any origin
    /// - Tracing is enabled
    pub fn new() -> Self {
        Self {
            control_token: None,
            cors_origins: None,
            enable_tracing: true,
        }
    }

    /// Require `token` on control commands.
    pub fn with_control_token(mut self, token: impl Into<String>) -> Self {
        self.control_token = Some(token.into());
        self
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// This function builds the complete Axum router with:
/// - The health check
/// - Control commands under `/_offline`, behind the token when configured
/// - CORS configuration on those local routes only
/// - The cache router for absolute-form requests and every other path
/// - Request tracing (optional)
pub fn create_router(state: AppState, config: RouterConfig) -> Router {
    let cors = build_cors_layer(&config);

    let control = build_control_router(config.control_token.as_deref());

    // CORS covers the proxy's own routes; intercepted traffic passes through untouched
    let local = Router::new()
        .route("/health", get(health_handler))
        .nest(CONTROL_PREFIX, control)
        .layer(cors);

    let router = Router::new()
        .merge(local)
        .fallback(proxy_handler)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            absolute_form_middleware,
        ))
        .with_state(state);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Control command routes, with the auth layer applied when a token is set.
fn build_control_router(token: Option<&str>) -> Router<AppState> {
    let control = Router::new()
        .route("/version", get(version_handler))
        .route("/prefetch", get(running_handler).post(prefetch_handler))
        .route("/prefetch/{area}", delete(cancel_handler))
        .route("/events", get(events_handler))
        .route("/install", post(install_handler))
        .route("/activate", post(activate_handler))
        .route("/cache-page", post(cache_page_handler))
        .route("/tiers", get(tiers_handler))
        .fallback(control_not_found_handler);

    match token {
        Some(token) => control.layer(middleware::from_fn_with_state(
            ControlToken::new(token),
            auth_middleware,
        )),
        None => control,
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
