//! Cache size bounding by insertion order.

use tracing::debug;

use crate::error::StorageError;

use super::store::TierStore;

/// Default maximum number of entries in the tile tier.
pub const DEFAULT_MAX_TILE_ENTRIES: usize = 500;

/// Trim `tier` to at most `max_entries` by deleting its oldest entries.
///
/// Returns the number of evicted entries. Running it twice in a row evicts
/// nothing the second time.
pub async fn limit_tier_size<S: TierStore + ?Sized>(
    store: &S,
    tier: &str,
    max_entries: usize,
) -> Result<usize, StorageError> {
    let keys = store.keys(tier).await?;
    if keys.len() <= max_entries {
        return Ok(0);
    }

    let excess = keys.len() - max_entries;
    let mut evicted = 0;
    for key in keys.iter().take(excess) {
        if store.delete(tier, key).await? {
            evicted += 1;
        }
    }

    debug!(tier, evicted, max_entries, "Bounded cache tier");
    Ok(evicted)
}
