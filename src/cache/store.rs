//! Tier storage abstraction and in-memory implementation.
//!
//! A [`TierStore`] holds any number of named tiers. Each tier maps a
//! [`RequestIdentity`] to a [`CachedResponse`] and remembers insertion order,
//! which the size bounder uses as its eviction order.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;

use super::identity::{CachedResponse, RequestIdentity};

// =============================================================================
// TierStore Trait
// =============================================================================

/// Trait for persistent, named key-value cache tiers.
///
/// Tiers are created lazily by [`open`](TierStore::open) or the first
/// [`put`](TierStore::put), and live until [`delete_tier`](TierStore::delete_tier).
/// Writes are last-write-wins; re-storing an identity moves it to the newest
/// position.
#[async_trait]
pub trait TierStore: Send + Sync {
    /// Create the tier if it does not exist yet.
    async fn open(&self, tier: &str) -> Result<(), StorageError>;

    /// Exact identity lookup.
    async fn get(
        &self,
        tier: &str,
        identity: &RequestIdentity,
    ) -> Result<Option<CachedResponse>, StorageError>;

    /// Lookup by URL alone, ignoring the method.
    async fn get_by_url(&self, tier: &str, url: &str)
        -> Result<Option<CachedResponse>, StorageError>;

    /// Store a response, replacing any previous entry for the identity.
    ///
    /// Fails with [`StorageError::UncacheableStatus`] for non-2xx responses.
    async fn put(
        &self,
        tier: &str,
        identity: &RequestIdentity,
        response: &CachedResponse,
    ) -> Result<(), StorageError>;

    /// Remove one entry. Returns whether it existed.
    async fn delete(&self, tier: &str, identity: &RequestIdentity) -> Result<bool, StorageError>;

    /// All identities in the tier, oldest first.
    async fn keys(&self, tier: &str) -> Result<Vec<RequestIdentity>, StorageError>;

    /// Number of entries in the tier (0 for unknown tiers).
    async fn len(&self, tier: &str) -> Result<usize, StorageError>;

    /// Names of all existing tiers, sorted.
    async fn tier_names(&self) -> Result<Vec<String>, StorageError>;

    /// Drop a whole tier. Returns whether it existed.
    async fn delete_tier(&self, tier: &str) -> Result<bool, StorageError>;
}

/// Reject responses a tier must never hold.
pub(crate) fn ensure_cacheable(
    identity: &RequestIdentity,
    response: &CachedResponse,
) -> Result<(), StorageError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(StorageError::UncacheableStatus {
            status: response.status,
            url: identity.url.clone(),
        })
    }
}

// =============================================================================
// In-Memory Store
// =============================================================================

type TierEntries = Vec<(RequestIdentity, CachedResponse)>;

/// Tier store that keeps everything in memory.
///
/// Used for tests and for `--ephemeral` runs; contents are lost on exit.
#[derive(Default)]
pub struct MemoryTierStore {
    tiers: RwLock<BTreeMap<String, TierEntries>>,
}

impl MemoryTierStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TierStore for MemoryTierStore {
    async fn open(&self, tier: &str) -> Result<(), StorageError> {
        let mut tiers = self.tiers.write().await;
        tiers.entry(tier.to_string()).or_default();
        Ok(())
    }

    async fn get(
        &self,
        tier: &str,
        identity: &RequestIdentity,
    ) -> Result<Option<CachedResponse>, StorageError> {
        let tiers = self.tiers.read().await;
        Ok(tiers.get(tier).and_then(|entries| {
            entries
                .iter()
                .find(|(key, _)| key == identity)
                .map(|(_, response)| response.clone())
        }))
    }

    async fn get_by_url(
        &self,
        tier: &str,
        url: &str,
    ) -> Result<Option<CachedResponse>, StorageError> {
        let tiers = self.tiers.read().await;
        Ok(tiers.get(tier).and_then(|entries| {
            entries
                .iter()
                .find(|(key, _)| key.url == url)
                .map(|(_, response)| response.clone())
        }))
    }

    async fn put(
        &self,
        tier: &str,
        identity: &RequestIdentity,
        response: &CachedResponse,
    ) -> Result<(), StorageError> {
        ensure_cacheable(identity, response)?;

        let mut tiers = self.tiers.write().await;
        let entries = tiers.entry(tier.to_string()).or_default();
        entries.retain(|(key, _)| key != identity);
        entries.push((identity.clone(), response.clone()));
        Ok(())
    }

    async fn delete(&self, tier: &str, identity: &RequestIdentity) -> Result<bool, StorageError> {
        let mut tiers = self.tiers.write().await;
        let Some(entries) = tiers.get_mut(tier) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|(key, _)| key != identity);
        Ok(entries.len() != before)
    }

    async fn keys(&self, tier: &str) -> Result<Vec<RequestIdentity>, StorageError> {
        let tiers = self.tiers.read().await;
        Ok(tiers
            .get(tier)
            .map(|entries| entries.iter().map(|(key, _)| key.clone()).collect())
            .unwrap_or_default())
    }

    async fn len(&self, tier: &str) -> Result<usize, StorageError> {
        let tiers = self.tiers.read().await;
        Ok(tiers.get(tier).map(Vec::len).unwrap_or(0))
    }

    async fn tier_names(&self) -> Result<Vec<String>, StorageError> {
        let tiers = self.tiers.read().await;
        Ok(tiers.keys().cloned().collect())
    }

    async fn delete_tier(&self, tier: &str) -> Result<bool, StorageError> {
        let mut tiers = self.tiers.write().await;
        Ok(tiers.remove(tier).is_some())
    }
}

// =============================================================================
// Tests
// =============================================================================
