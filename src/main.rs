//! Offline Map Proxy - an offline-first caching proxy for map applications.
//!
//! This binary opens the tier store, runs activation and starts the HTTP server.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use offline_map_proxy::{
    cache::{MemoryTierStore, SqliteTierStore, TierStore},
    config::Config,
    net::{Fetcher, ReqwestFetcher},
    server::{create_router, AppState, RouterConfig},
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let store = match open_store(&config) {
        Ok(store) => store,
        Err(message) => {
            error!("{}", message);
            return ExitCode::FAILURE;
        }
    };

    let fetcher: Arc<dyn Fetcher> =
        match ReqwestFetcher::new(Duration::from_secs(config.upstream_timeout)) {
            Ok(fetcher) => Arc::new(fetcher),
            Err(e) => {
                error!("Failed to build HTTP client: {}", e);
                return ExitCode::FAILURE;
            }
        };

    let cache_config = Arc::new(config.cache_config());

    info!("Configuration:");
    info!("  App scope: {}", cache_config.app_scope);
    info!("  Provider: {}", cache_config.provider_host);
    info!("  Tiers: {}", cache_config.tiers.names().join(", "));
    info!("  Tile tier limit: {} entries", cache_config.max_tile_entries);
    info!("  Prefetch concurrency: {}", cache_config.prefetch_concurrency);
    if config.control_token.is_some() {
        info!("  Control token: enabled");
    } else {
        warn!("  Control token: DISABLED - /_offline/* commands are open");
        warn!("        Enable with --control-token=<token>");
    }

    let state = AppState::new(store, fetcher, cache_config);

    match state.lifecycle.activate().await {
        Ok(deleted) if !deleted.is_empty() => {
            info!("  Removed obsolete tiers: {}", deleted.join(", "))
        }
        Ok(_) => {}
        Err(e) => {
            error!("Activation failed: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let router = create_router(state, build_router_config(&config));

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("");
    info!("  Proxy listening on: http://{}", addr);
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/_offline/tiers", addr);
    info!("");

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Open the tier store selected by the configuration.
fn open_store(config: &Config) -> Result<Arc<dyn TierStore>, String> {
    if config.ephemeral {
        warn!("  Storage: in memory, tiers are lost on exit");
        return Ok(Arc::new(MemoryTierStore::new()));
    }

    let path = config
        .db_path
        .clone()
        .or_else(SqliteTierStore::default_path)
        .ok_or_else(|| "No data directory found; pass --db-path or --ephemeral".to_string())?;

    info!("  Storage: {}", path.display());
    let store = SqliteTierStore::open(&path)
        .map_err(|e| format!("Failed to open tier database {}: {}", path.display(), e))?;
    Ok(Arc::new(store))
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "offline_map_proxy=debug,tower_http=debug"
    } else {
        "offline_map_proxy=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the CLI configuration.
fn build_router_config(config: &Config) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_tracing(!config.no_tracing);

    if let Some(ref token) = config.control_token {
        router_config = router_config.with_control_token(token.clone());
    }

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}
