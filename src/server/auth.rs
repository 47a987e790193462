//! Bearer-token authentication for control commands.
//!
//! When a control token is configured, every `/_offline/` request must carry
//! `Authorization: Bearer <token>`. Intercepted requests are never
//! authenticated: they are the application's own traffic.
//!
//! # Example
//!
//! ```ignore
//! use axum::{middleware, Router};
//! use offline_map_proxy::server::auth::{auth_middleware, ControlToken};
//!
//! let control = Router::new()
//!     .route("/version", get(version_handler))
//!     .layer(middleware::from_fn_with_state(
//!         ControlToken::new("secret"),
//!         auth_middleware,
//!     ));
//! ```

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::handlers::ErrorResponse;

const BEARER_PREFIX: &str = "bearer ";

// =============================================================================
// Error Types
// =============================================================================

/// Authentication errors for control commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No Authorization header
    MissingToken,

    /// Authorization header is not a bearer credential
    MalformedHeader,

    /// Token does not match
    InvalidToken,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Missing Authorization header"),
            AuthError::MalformedHeader => {
                write!(f, "Authorization header must be 'Bearer <token>'")
            }
            AuthError::InvalidToken => write!(f, "Invalid control token"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = StatusCode::UNAUTHORIZED;
        let error_type = match &self {
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedHeader => "malformed_authorization",
            AuthError::InvalidToken => "invalid_token",
        };
        let message = self.to_string();

        // A wrong token is worth noticing; a missing one is usually a misconfigured client
        match &self {
            AuthError::InvalidToken => warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Authentication failed: {}",
                message
            ),
            _ => debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Authentication failed: {}",
                message
            ),
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Control Token
// =============================================================================

/// Shared secret guarding control commands.
#[derive(Clone)]
pub struct ControlToken {
    token: Arc<str>,
}

impl ControlToken {
    pub fn new(token: impl AsRef<str>) -> Self {
        Self {
            token: Arc::from(token.as_ref()),
        }
    }

    /// Check the Authorization header in `headers`.
    pub fn verify(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let value = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingToken)?
            .to_str()
            .map_err(|_| AuthError::MalformedHeader)?;

        let presented = bearer_token(value).ok_or(AuthError::MalformedHeader)?;

        if presented.as_bytes().ct_eq(self.token.as_bytes()).into() {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

impl fmt::Debug for ControlToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlToken").finish_non_exhaustive()
    }
}

/// Credential of a `Bearer` Authorization value; the scheme is case-insensitive.
fn bearer_token(value: &str) -> Option<&str> {
    let prefix = value.get(..BEARER_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(BEARER_PREFIX) {
        return None;
    }
    let token = value[BEARER_PREFIX.len()..].trim();
    (!token.is_empty()).then_some(token)
}

// =============================================================================
// Axum Middleware
// =============================================================================

/// Axum middleware rejecting control commands without the configured token.
pub async fn auth_middleware(
    State(token): State<ControlToken>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    token.verify(request.headers())?;
    Ok(next.run(request).await)
}

// =============================================================================
// Tests
// =============================================================================
