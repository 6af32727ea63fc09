//! Review Fingerprint Cache (C8, §3.4, §4.7): a durable per-MR set of
//! "clean" content fingerprints, letting a re-review of unchanged diffs
//! skip straight past the LLM.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// The durable shape (§3.4): an array, because the backing document store
/// has no native set type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredCache {
    last_updated: i64,
    fingerprints: Vec<String>,
}

/// The in-memory working shape a review run mutates: a set, cloned into the
/// task-local "working cache" at the start of a run (§5 "Shared resources").
#[derive(Debug, Clone, Default)]
pub struct FingerprintCache {
    pub last_updated: i64,
    pub fingerprints: HashSet<String>,
}

impl From<StoredCache> for FingerprintCache {
    fn from(stored: StoredCache) -> Self {
        Self {
            last_updated: stored.last_updated,
            fingerprints: stored.fingerprints.into_iter().collect(),
        }
    }
}

impl From<&FingerprintCache> for StoredCache {
    fn from(cache: &FingerprintCache) -> Self {
        let mut fingerprints: Vec<String> = cache.fingerprints.iter().cloned().collect();
        fingerprints.sort();
        Self {
            last_updated: cache.last_updated,
            fingerprints,
        }
    }
}

/// Derives the durable document id from `(project_id, mr_iid)` (§4.7):
/// string project ids have characters outside `[A-Za-z0-9_-]` replaced with
/// `_`; numeric ids are used as-is.
pub fn cache_document_id(project_id: &str, mr_iid: u64) -> String {
    let safe_project_id: String = project_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("proj_{safe_project_id}_mr_{mr_iid}")
}

#[async_trait]
pub trait ReviewCacheStore: Send + Sync {
    /// Returns the cache for `(project_id, mr_iid)`. An absent document, or
    /// one whose shape doesn't parse, returns a fresh empty cache rather
    /// than an error (§4.7).
    async fn get(&self, project_id: &str, mr_iid: u64) -> Result<FingerprintCache, crate::error::ReviewError>;

    /// Overwrites the document for `(project_id, mr_iid)` with `cache`,
    /// converting set → array and unconditionally bumping `last_updated`.
    async fn update(
        &self,
        project_id: &str,
        mr_iid: u64,
        cache: &FingerprintCache,
        now_ms: i64,
    ) -> Result<(), crate::error::ReviewError>;
}

#[derive(Default)]
pub struct InMemoryReviewCacheStore {
    documents: Mutex<std::collections::HashMap<String, String>>,
}

impl InMemoryReviewCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReviewCacheStore for InMemoryReviewCacheStore {
    async fn get(&self, project_id: &str, mr_iid: u64) -> Result<FingerprintCache, crate::error::ReviewError> {
        let id = cache_document_id(project_id, mr_iid);
        let guard = self.documents.lock().unwrap();
        let Some(raw) = guard.get(&id) else {
            return Ok(FingerprintCache::default());
        };
        match serde_json::from_str::<StoredCache>(raw) {
            Ok(stored) => Ok(stored.into()),
            Err(e) => {
                log::warn!("fingerprint cache document {id} has an invalid shape, using empty cache: {e}");
                Ok(FingerprintCache::default())
            }
        }
    }

    async fn update(
        &self,
        project_id: &str,
        mr_iid: u64,
        cache: &FingerprintCache,
        now_ms: i64,
    ) -> Result<(), crate::error::ReviewError> {
        let id = cache_document_id(project_id, mr_iid);
        let mut stored: StoredCache = cache.into();
        stored.last_updated = now_ms;
        let raw = serde_json::to_string(&stored)?;
        self.documents.lock().unwrap().insert(id, raw);
        Ok(())
    }
}

pub struct SqliteReviewCacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReviewCacheStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, crate::error::ReviewError> {
        let conn = Connection::open(path)?;
        Self::bootstrap(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self, crate::error::ReviewError> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn bootstrap(conn: &Connection) -> Result<(), crate::error::ReviewError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS review_fingerprint_caches (
                document_id TEXT PRIMARY KEY,
                document    TEXT NOT NULL
             );",
        )?;
        Ok(())
    }
}

#[async_trait]
impl ReviewCacheStore for SqliteReviewCacheStore {
    async fn get(&self, project_id: &str, mr_iid: u64) -> Result<FingerprintCache, crate::error::ReviewError> {
        let id = cache_document_id(project_id, mr_iid);
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let raw: Option<String> = conn
                .query_row(
                    "SELECT document FROM review_fingerprint_caches WHERE document_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let cache = match raw {
                None => FingerprintCache::default(),
                Some(raw) => match serde_json::from_str::<StoredCache>(&raw) {
                    Ok(stored) => stored.into(),
                    Err(e) => {
                        log::warn!("fingerprint cache document had an invalid shape, using empty cache: {e}");
                        FingerprintCache::default()
                    }
                },
            };
            Ok::<_, crate::error::ReviewError>(cache)
        })
        .await
        .map_err(|e| crate::error::ReviewError::Storage(e.to_string()))?
    }

    async fn update(
        &self,
        project_id: &str,
        mr_iid: u64,
        cache: &FingerprintCache,
        now_ms: i64,
    ) -> Result<(), crate::error::ReviewError> {
        let id = cache_document_id(project_id, mr_iid);
        let mut stored: StoredCache = cache.into();
        stored.last_updated = now_ms;
        let raw = serde_json::to_string(&stored)?;
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO review_fingerprint_caches (document_id, document) VALUES (?1, ?2)
                 ON CONFLICT(document_id) DO UPDATE SET document = excluded.document",
                params![id, raw],
            )?;
            Ok::<_, crate::error::ReviewError>(())
        })
        .await
        .map_err(|e| crate::error::ReviewError::Storage(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_sanitizes_non_alphanumeric_characters() {
        assert_eq!(cache_document_id("group/project name!", 101), "proj_group_project_name__mr_101");
    }

    #[test]
    fn document_id_leaves_numeric_ids_as_is() {
        assert_eq!(cache_document_id("12345", 7), "proj_12345_mr_7");
    }

    #[tokio::test]
    async fn absent_document_returns_an_empty_cache() {
        let store = InMemoryReviewCacheStore::new();
        let cache = store.get("proj", 1).await.unwrap();
        assert!(cache.fingerprints.is_empty());
    }

    #[tokio::test]
    async fn invalid_shape_returns_an_empty_cache_rather_than_erroring() {
        let store = InMemoryReviewCacheStore::new();
        let id = cache_document_id("proj", 1);
        store.documents.lock().unwrap().insert(id, r#"{"fingerprints": "not-an-array"}"#.to_string());

        let cache = store.get("proj", 1).await.unwrap();
        assert!(cache.fingerprints.is_empty());
    }

    #[tokio::test]
    async fn update_then_get_round_trips_and_bumps_last_updated() {
        let store = InMemoryReviewCacheStore::new();
        let mut cache = FingerprintCache::default();
        cache.fingerprints.insert("abc123".to_string());
        store.update("proj", 1, &cache, 1000).await.unwrap();

        let loaded = store.get("proj", 1).await.unwrap();
        assert!(loaded.fingerprints.contains("abc123"));
        assert_eq!(loaded.last_updated, 1000);
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_the_same_way_as_in_memory() {
        let store = SqliteReviewCacheStore::open_in_memory().unwrap();
        let mut cache = FingerprintCache::default();
        cache.fingerprints.insert("xyz".to_string());
        store.update("group/proj", 42, &cache, 500).await.unwrap();

        let loaded = store.get("group/proj", 42).await.unwrap();
        assert!(loaded.fingerprints.contains("xyz"));
        assert_eq!(loaded.last_updated, 500);
    }
}
