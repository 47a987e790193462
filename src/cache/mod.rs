//! Persistent cache tiers.
//!
//! Responses are stored in named tiers behind the [`TierStore`] trait. Two
//! implementations exist: [`SqliteTierStore`] (survives restarts) and
//! [`MemoryTierStore`] (tests and `--ephemeral`).
//!
//! On top of the store sit three small policies:
//!
//! - [`limit_tier_size`]: insertion-order eviction for the tile tier
//! - [`FallbackResolver`]: best cached page for an offline navigation
//! - [`collect_obsolete`]: activation-time removal of old tier versions

mod bounder;
mod fallback;
mod identity;
mod sqlite;
mod store;
mod tiers;

pub use bounder::{limit_tier_size, DEFAULT_MAX_TILE_ENTRIES};
pub use fallback::{fallback_identity, FallbackHit, FallbackResolver, DEFAULT_APP_SCOPE, FALLBACK_KEY_PATH};
pub use identity::{CachedResponse, RequestIdentity};
pub use sqlite::SqliteTierStore;
pub use store::{MemoryTierStore, TierStore};
pub use tiers::{
    collect_obsolete, TierSet, DEFAULT_HTML_VERSION, DEFAULT_METADATA_VERSION,
    DEFAULT_STATIC_VERSION, DEFAULT_TILE_VERSION, MAP_API_METADATA, PAGE_HTML, STATIC_ASSETS,
    TILE_DATA,
};
