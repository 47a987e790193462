//! HTTP server layer for the offline map proxy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │    /_offline/* control commands      * intercepted requests     │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │    auth     │  │        routes           │  │
//! │  │ (requests)  │  │  (bearer)   │  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::{auth_middleware, AuthError, ControlToken};
pub use handlers::{
    absolute_form_middleware, health_handler, proxy_handler, ActivateResponse, AppState,
    CachePageResponse, CancelResponse, ErrorResponse, HealthResponse, PrefetchAccepted,
    PrefetchQueryParams, RunningResponse, TiersResponse, MAX_BODY_BYTES,
};
pub use routes::{create_router, RouterConfig, CONTROL_PREFIX};
