//! SQLite-backed tier store.
//!
//! All tiers share one database file. Entries carry an autoincrement sequence
//! number so insertion order survives restarts; `INSERT OR REPLACE` on the
//! `(tier, method, url)` key gives re-written entries a fresh sequence number.
//! Queries run on tokio's blocking pool so disk writes never stall the runtime.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::StorageError;

use super::identity::{CachedResponse, RequestIdentity};
use super::store::{ensure_cacheable, TierStore};

/// Schema for the tier tables.
const TIER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tiers (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    tier TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (tier, method, url)
);

CREATE INDEX IF NOT EXISTS idx_entries_tier_url ON entries(tier, url);
"#;

/// SQLite-based tier store.
pub struct SqliteTierStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTierStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Sqlite(format!(
                        "Failed to create cache directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path).map_err(|e| {
            StorageError::Sqlite(format!(
                "Failed to open tier database at {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!(path = %path.display(), "Opened tier database");
        Self::with_connection(conn)
    }

    /// Open a store that lives only as long as the process.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    /// Default database location under the user's data directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
            .map(|dir| dir.join("offline-map-proxy").join("tiers.db"))
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(TIER_SCHEMA)
            .map_err(|e| StorageError::Sqlite(format!("Failed to run tier migrations: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn call<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::TaskFailed(e.to_string()))?
    }
}

/// Decode one `(status, headers, body)` row.
fn decode_response(
    status: i64,
    headers: String,
    body: Vec<u8>,
) -> Result<CachedResponse, StorageError> {
    let headers: Vec<(String, String)> = serde_json::from_str(&headers)?;
    let status = u16::try_from(status)
        .map_err(|_| StorageError::Serialization(format!("Invalid stored status {}", status)))?;
    Ok(CachedResponse {
        status,
        headers,
        body: Bytes::from(body),
    })
}

type ResponseRow = (i64, String, Vec<u8>);

#[async_trait]
impl TierStore for SqliteTierStore {
    async fn open(&self, tier: &str) -> Result<(), StorageError> {
        let tier = tier.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO tiers (name) VALUES (?)",
                params![tier],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(
        &self,
        tier: &str,
        identity: &RequestIdentity,
    ) -> Result<Option<CachedResponse>, StorageError> {
        let tier = tier.to_string();
        let identity = identity.clone();
        let row: Option<ResponseRow> = self
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT status, headers, body FROM entries
                     WHERE tier = ? AND method = ? AND url = ?",
                )?;
                let row = stmt
                    .query_row(params![tier, identity.method, identity.url], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(|(status, headers, body)| decode_response(status, headers, body))
            .transpose()
    }

    async fn get_by_url(
        &self,
        tier: &str,
        url: &str,
    ) -> Result<Option<CachedResponse>, StorageError> {
        let tier = tier.to_string();
        let url = url.to_string();
        let row: Option<ResponseRow> = self
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT status, headers, body FROM entries
                     WHERE tier = ? AND url = ?
                     ORDER BY seq DESC LIMIT 1",
                )?;
                let row = stmt
                    .query_row(params![tier, url], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(|(status, headers, body)| decode_response(status, headers, body))
            .transpose()
    }

    async fn put(
        &self,
        tier: &str,
        identity: &RequestIdentity,
        response: &CachedResponse,
    ) -> Result<(), StorageError> {
        ensure_cacheable(identity, response)?;
        let headers = serde_json::to_string(&response.headers)?;
        let tier = tier.to_string();
        let identity = identity.clone();
        let status = response.status;
        let body = response.body.clone();

        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO tiers (name) VALUES (?)",
                params![tier],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO entries (tier, method, url, status, headers, body, stored_at)
                 VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
                params![
                    tier,
                    identity.method,
                    identity.url,
                    status,
                    headers,
                    body.as_ref()
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, tier: &str, identity: &RequestIdentity) -> Result<bool, StorageError> {
        let tier = tier.to_string();
        let identity = identity.clone();
        self.call(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM entries WHERE tier = ? AND method = ? AND url = ?",
                params![tier, identity.method, identity.url],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn keys(&self, tier: &str) -> Result<Vec<RequestIdentity>, StorageError> {
        let tier = tier.to_string();
        self.call(move |conn| {
            let mut stmt = conn
                .prepare_cached("SELECT method, url FROM entries WHERE tier = ? ORDER BY seq")?;
            let keys = stmt
                .query_map(params![tier], |row| {
                    Ok(RequestIdentity {
                        method: row.get(0)?,
                        url: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn len(&self, tier: &str) -> Result<usize, StorageError> {
        let tier = tier.to_string();
        self.call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM entries WHERE tier = ?",
                params![tier],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    async fn tier_names(&self) -> Result<Vec<String>, StorageError> {
        self.call(|conn| {
            let mut stmt = conn.prepare_cached("SELECT name FROM tiers ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
        .await
    }

    async fn delete_tier(&self, tier: &str) -> Result<bool, StorageError> {
        let tier = tier.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM entries WHERE tier = ?", params![tier])?;
            let removed = tx.execute("DELETE FROM tiers WHERE name = ?", params![tier])?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }
}

// =============================================================================
// Tests
// =============================================================================
