//! Versioned tier names and obsolete-tier collection.
//!
//! Every logical tier is stored under `{logical}-{version}`. Bumping a version
//! makes the old physical tier obsolete; activation then deletes it.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::StorageError;

use super::store::TierStore;

/// Logical name of the static asset tier.
pub const STATIC_ASSETS: &str = "static-assets";

/// Logical name of the map tile tier.
pub const TILE_DATA: &str = "tile-data";

/// Logical name of the map API metadata tier (styles, sprites, glyphs).
pub const MAP_API_METADATA: &str = "map-api-metadata";

/// Logical name of the navigation HTML tier.
pub const PAGE_HTML: &str = "page-html";

/// Default version tags.
pub const DEFAULT_STATIC_VERSION: &str = "v5";
pub const DEFAULT_TILE_VERSION: &str = "v1";
pub const DEFAULT_METADATA_VERSION: &str = "v1";
pub const DEFAULT_HTML_VERSION: &str = "v3";

/// The four physical tier names in use by the running process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSet {
    pub static_assets: String,
    pub tile_data: String,
    pub map_api_metadata: String,
    pub page_html: String,
}

impl Default for TierSet {
    fn default() -> Self {
        Self::new(
            DEFAULT_STATIC_VERSION,
            DEFAULT_TILE_VERSION,
            DEFAULT_METADATA_VERSION,
            DEFAULT_HTML_VERSION,
        )
    }
}

impl TierSet {
    /// Build a tier set from per-tier version tags.
    pub fn new(
        static_version: &str,
        tile_version: &str,
        metadata_version: &str,
        html_version: &str,
    ) -> Self {
        Self {
            static_assets: versioned(STATIC_ASSETS, static_version),
            tile_data: versioned(TILE_DATA, tile_version),
            map_api_metadata: versioned(MAP_API_METADATA, metadata_version),
            page_html: versioned(PAGE_HTML, html_version),
        }
    }

    /// Physical names, in fallback search order.
    pub fn names(&self) -> [&str; 4] {
        [
            &self.page_html,
            &self.static_assets,
            &self.map_api_metadata,
            &self.tile_data,
        ]
    }

    /// Whether `name` is one of the current tiers.
    pub fn contains(&self, name: &str) -> bool {
        self.names().contains(&name)
    }
}

fn versioned(logical: &str, version: &str) -> String {
    format!("{}-{}", logical, version)
}

/// Delete every tier in `store` that is not part of `current`.
///
/// Returns the deleted names. A failed delete is logged and skipped.
pub async fn collect_obsolete<S: TierStore + ?Sized>(
    store: &S,
    current: &TierSet,
) -> Result<Vec<String>, StorageError> {
    let mut deleted = Vec::new();

    for name in store.tier_names().await? {
        if current.contains(&name) {
            continue;
        }
        match store.delete_tier(&name).await {
            Ok(true) => {
                info!(tier = %name, "Deleted obsolete cache tier");
                deleted.push(name);
            }
            Ok(false) => {}
            Err(e) => warn!(tier = %name, error = %e, "Failed to delete obsolete cache tier"),
        }
    }

    Ok(deleted)
}
