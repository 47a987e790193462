//! HTTP request handlers for the proxy and its control commands.
//!
//! Every request outside `/health` and `/_offline/` is an intercepted request and
//! goes through [`CacheRouter::handle`]. Control commands return JSON, and
//! failures use the [`ErrorResponse`] envelope.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Path, Query, Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::TierStore;
use crate::config::CacheConfig;
use crate::error::{FetchError, PrefetchError, StorageError};
use crate::lifecycle::{InstallReport, Lifecycle, TierStats, VersionReport};
use crate::net::{Fetcher, ProxyRequest};
use crate::prefetch::{AreaPrefetchJob, EventBus, PrefetchCommand, PrefetchEvent, PrefetchManager};
use crate::router::{CacheRouter, RoutedResponse, SOURCE_HEADER};

/// Largest request body the proxy buffers before forwarding.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

// =============================================================================
// Application State
// =============================================================================

/// Shared state for all handlers.
pub struct AppState {
    /// Strategy selection and serving
    pub router: CacheRouter,

    /// Area prefetch jobs
    pub prefetch: PrefetchManager,

    /// Install, activate and cache-page commands
    pub lifecycle: Lifecycle,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            prefetch: self.prefetch.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

impl AppState {
    /// Wire the router, prefetch manager and lifecycle over one store and fetcher.
    pub fn new(
        store: Arc<dyn TierStore>,
        fetcher: Arc<dyn Fetcher>,
        config: Arc<CacheConfig>,
    ) -> Self {
        Self::with_events(store, fetcher, config, EventBus::default())
    }

    /// Like [`AppState::new`] but publishing prefetch events to `events`.
    pub fn with_events(
        store: Arc<dyn TierStore>,
        fetcher: Arc<dyn Fetcher>,
        config: Arc<CacheConfig>,
        events: EventBus,
    ) -> Self {
        let router = CacheRouter::new(store.clone(), fetcher.clone(), config.clone());
        let job = AreaPrefetchJob::new(store.clone(), fetcher.clone(), config.clone(), events);
        let lifecycle = Lifecycle::new(store, fetcher, config);

        Self {
            router,
            prefetch: PrefetchManager::new(job),
            lifecycle,
        }
    }

    pub fn events(&self) -> &EventBus {
        self.prefetch.events()
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Query parameters for `POST /_offline/prefetch`.
#[derive(Debug, Default, Deserialize)]
pub struct PrefetchQueryParams {
    /// Hold the request open until the job finishes and reply with its summary
    #[serde(default)]
    pub wait: bool,
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Create a new error response with status code.
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

/// Reply to a prefetch that was scheduled without waiting.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchAccepted {
    pub area_name: String,
    pub status: &'static str,
}

/// Reply to a cancellation request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub area_name: String,
    pub cancelled: bool,
}

/// Names of the jobs still running.
#[derive(Debug, Serialize)]
pub struct RunningResponse {
    pub running: Vec<String>,
}

/// Tiers deleted by an activation.
#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    pub deleted: Vec<String>,
}

/// Outcome of a cache-page command.
#[derive(Debug, Serialize)]
pub struct CachePageResponse {
    pub cached: bool,
}

/// Entry counts of the stored tiers.
#[derive(Debug, Serialize)]
pub struct TiersResponse {
    pub tiers: Vec<TierStats>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Log an error response by severity and build it.
fn error_response(status: StatusCode, error_type: &str, message: String) -> Response {
    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else if status == StatusCode::NOT_FOUND {
        debug!(
            error_type = error_type,
            status = status.as_u16(),
            "Not found: {}",
            message
        );
    } else if status.is_client_error() {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }

    let body = ErrorResponse::with_status(error_type, message, status);
    (status, Json(body)).into_response()
}

impl IntoResponse for PrefetchError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            PrefetchError::Style(_) => (StatusCode::BAD_REQUEST, "invalid_style"),
            PrefetchError::InvalidArea { .. } => (StatusCode::BAD_REQUEST, "invalid_area"),
            PrefetchError::AlreadyRunning { .. } => (StatusCode::CONFLICT, "already_running"),
            PrefetchError::DescriptorFetch(_)
            | PrefetchError::DescriptorStatus { .. }
            | PrefetchError::DescriptorParse(_) => (StatusCode::BAD_GATEWAY, "descriptor_unavailable"),
            PrefetchError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };
        error_response(status, error_type, self.to_string())
    }
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            self.to_string(),
        )
    }
}

impl IntoResponse for FetchError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            FetchError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
            FetchError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            FetchError::Connection(_) | FetchError::Body(_) => {
                (StatusCode::BAD_GATEWAY, "bad_gateway")
            }
        };
        error_response(status, error_type, self.to_string())
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Send absolute-form requests to [`proxy_handler`] before path routing.
///
/// A forward-proxied URL such as `https://backend.example.org/health` belongs
/// to the upstream origin even when its path matches a local route.
pub async fn absolute_form_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let uri = request.uri();
    if uri.scheme().is_some() && uri.authority().is_some() {
        return proxy_handler(State(state), request).await;
    }
    next.run(request).await
}

/// Intercepted request endpoint.
///
/// The target URL is taken from an absolute-form request target when the
/// client uses the server as a forward proxy, or rebuilt from the `Host`
/// header otherwise. The response carries an `x-offline-source` header naming
/// where it came from.
pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let url = match target_url(&parts.uri, &parts.headers) {
        Ok(url) => url,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, "invalid_request", message),
    };

    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "body_too_large",
                format!("Failed to buffer request body: {}", e),
            )
        }
    };

    let proxied = ProxyRequest::new(parts.method, url, parts.headers, body);
    let routed = state.router.handle(proxied).await;
    into_http_response(routed)
}

/// Report the current tier set.
///
/// # Endpoint
///
/// `GET /_offline/version`
pub async fn version_handler(State(state): State<AppState>) -> Json<VersionReport> {
    Json(state.lifecycle.version())
}

/// Start an area prefetch.
///
/// # Endpoint
///
/// `POST /_offline/prefetch[?wait=true]`
///
/// Without `wait` the job is scheduled and `202 Accepted` is returned at once;
/// progress is observable on `/_offline/events`. With `wait` the reply is the
/// job's summary.
pub async fn prefetch_handler(
    State(state): State<AppState>,
    Query(params): Query<PrefetchQueryParams>,
    Json(command): Json<PrefetchCommand>,
) -> Result<Response, PrefetchError> {
    command.validate()?;

    let area_name = command.area_name.clone();
    let handle = state.prefetch.start(command)?;

    if !params.wait {
        let accepted = PrefetchAccepted {
            area_name,
            status: "accepted",
        };
        return Ok((StatusCode::ACCEPTED, Json(accepted)).into_response());
    }

    match handle.await {
        Ok(result) => Ok(Json(result?).into_response()),
        Err(e) => Ok(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "job_failed",
            format!("Prefetch task for '{}' did not finish: {}", area_name, e),
        )),
    }
}

/// List running prefetch jobs.
///
/// # Endpoint
///
/// `GET /_offline/prefetch`
pub async fn running_handler(State(state): State<AppState>) -> Json<RunningResponse> {
    Json(RunningResponse {
        running: state.prefetch.running_areas(),
    })
}

/// Cancel a running prefetch.
///
/// # Endpoint
///
/// `DELETE /_offline/prefetch/{area}`
pub async fn cancel_handler(State(state): State<AppState>, Path(area): Path<String>) -> Response {
    if !state.prefetch.cancel(&area) {
        return error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("No prefetch running for area '{}'", area),
        );
    }

    info!(area = %area, "Prefetch cancellation requested");
    let body = CancelResponse {
        area_name: area,
        cancelled: true,
    };
    (StatusCode::ACCEPTED, Json(body)).into_response()
}

/// Stream prefetch events as Server-Sent Events.
///
/// # Endpoint
///
/// `GET /_offline/events`
///
/// Each event is named after its `type` and carries the event JSON. Observers
/// that fall behind skip the events they missed.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events().subscribe();
    debug!(observers = state.events().observer_count(), "Event observer connected");

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => match sse_event(&event) {
                    Some(sse) => return Some((Ok(sse), receiver)),
                    None => continue,
                },
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Event observer lagged, skipping events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Warm the static assets and the application page.
///
/// # Endpoint
///
/// `POST /_offline/install`
pub async fn install_handler(State(state): State<AppState>) -> Json<InstallReport> {
    Json(state.lifecycle.install().await)
}

/// Delete obsolete tiers.
///
/// # Endpoint
///
/// `POST /_offline/activate`
pub async fn activate_handler(
    State(state): State<AppState>,
) -> Result<Json<ActivateResponse>, StorageError> {
    let deleted = state.lifecycle.activate().await?;
    Ok(Json(ActivateResponse { deleted }))
}

/// Re-fetch the application page into the HTML tier.
///
/// # Endpoint
///
/// `POST /_offline/cache-page`
pub async fn cache_page_handler(
    State(state): State<AppState>,
) -> Result<Json<CachePageResponse>, FetchError> {
    let cached = state.lifecycle.cache_current_page().await?;
    Ok(Json(CachePageResponse { cached }))
}

/// Entry count per stored tier.
///
/// # Endpoint
///
/// `GET /_offline/tiers`
pub async fn tiers_handler(
    State(state): State<AppState>,
) -> Result<Json<TiersResponse>, StorageError> {
    let tiers = state.lifecycle.tier_stats().await?;
    Ok(Json(TiersResponse { tiers }))
}

/// Unknown control command.
pub async fn control_not_found_handler(request: Request) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        format!("Unknown control command: {}", request.uri().path()),
    )
}

// =============================================================================
// Helpers
// =============================================================================

/// Absolute URL of an intercepted request.
fn target_url(uri: &http::Uri, headers: &http::HeaderMap) -> Result<Url, String> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string()).map_err(|e| format!("Invalid request target: {}", e));
    }

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| "Request has neither an absolute target nor a Host header".to_string())?;
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    Url::parse(&format!("http://{}{}", host, path))
        .map_err(|e| format!("Invalid request target: {}", e))
}

/// Turn a routed response into an HTTP response tagged with its source.
fn into_http_response(routed: RoutedResponse) -> Response {
    let RoutedResponse {
        source, response, ..
    } = routed;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut http_response = Response::new(Body::from(response.body));
    *http_response.status_mut() = status;

    let headers = http_response.headers_mut();
    for (name, value) in &response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(header = %name, "Dropping header that is not valid HTTP"),
        }
    }

    if let Ok(value) = HeaderValue::from_str(&source.header_value()) {
        headers.insert(SOURCE_HEADER, value);
    }

    http_response
}

/// SSE frame for one prefetch event.
fn sse_event(event: &PrefetchEvent) -> Option<Event> {
    let name = match event {
        PrefetchEvent::Progress { .. } => "progress",
        PrefetchEvent::Complete { .. } => "complete",
        PrefetchEvent::Error { .. } => "error",
    };

    match Event::default().event(name).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            warn!(error = %e, "Failed to encode prefetch event");
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
