//! Durable backing stores for search history
//!
//! The dispatcher reads a backend once at startup and writes the full history
//! snapshot after every completed search. Failures here are never fatal; the
//! caller logs them and keeps working from memory.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use super::store::HistoryEntry;
use crate::error::{Error, Result};

/// Persistence contract for history snapshots
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Short description for logs
    fn describe(&self) -> String;

    /// Load a previously saved snapshot. `Ok(None)` when nothing was saved yet.
    async fn load(&self) -> Result<Option<Vec<HistoryEntry>>>;

    /// Replace the saved snapshot
    async fn save(&self, entries: &[HistoryEntry]) -> Result<()>;

    /// Remove everything that was saved
    async fn clear(&self) -> Result<()>;
}

// =============================================================================
// JSON file
// =============================================================================

/// Whole history as one JSON array, replaced atomically on save
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "history.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl HistoryBackend for JsonFileBackend {
    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }

    async fn load(&self) -> Result<Option<Vec<HistoryEntry>>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let entries: Vec<HistoryEntry> = serde_json::from_str(&contents)?;
        debug!(path = %self.path.display(), count = entries.len(), "Loaded search history");
        Ok(Some(entries))
    }

    async fn save(&self, entries: &[HistoryEntry]) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let json = serde_json::to_vec_pretty(entries)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// SQL to create the search history table
pub const CREATE_SEARCH_HISTORY_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS search_history (
    query TEXT PRIMARY KEY,
    result_json TEXT NOT NULL,
    stored_at TEXT NOT NULL
);
"#;

/// History rows in a SQLite table, one per normalized query
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Create a backend from an existing connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to (creating if needed) a database file and initialize the schema
    pub async fn connect(database_path: &Path) -> Result<Self> {
        if let Some(dir) = database_path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let url = format!("sqlite://{}?mode=rwc", database_path.display());
        let pool = SqlitePool::connect(&url).await?;
        let backend = Self { pool };
        backend.init().await?;
        Ok(backend)
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let backend = Self { pool };
        backend.init().await?;
        Ok(backend)
    }

    /// Initialize the database schema
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_SEARCH_HISTORY_TABLE_SQL)
            .execute(&self.pool)
            .await?;
        info!("Search history table initialized");
        Ok(())
    }
}

#[async_trait]
impl HistoryBackend for SqliteBackend {
    fn describe(&self) -> String {
        "sqlite".to_string()
    }

    async fn load(&self) -> Result<Option<Vec<HistoryEntry>>> {
        let rows = sqlx::query(
            r#"
            SELECT query, result_json, stored_at
            FROM search_history
            ORDER BY stored_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let result_json: String = row.try_get("result_json")?;
            let stored_at: DateTime<Utc> = row.try_get("stored_at")?;
            entries.push(HistoryEntry {
                query: row.try_get("query")?,
                result: serde_json::from_str(&result_json)?,
                stored_at,
            });
        }
        Ok(Some(entries))
    }

    async fn save(&self, entries: &[HistoryEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            let result_json = serde_json::to_string(&entry.result)?;
            sqlx::query(
                r#"
                INSERT INTO search_history (query, result_json, stored_at)
                VALUES (?, ?, ?)
                ON CONFLICT(query) DO UPDATE SET
                    result_json = excluded.result_json,
                    stored_at = excluded.stored_at
                "#,
            )
            .bind(&entry.query)
            .bind(result_json)
            .bind(entry.stored_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(count = entries.len(), "Saved search history");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM search_history")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Backend that keeps the snapshot in memory; can be told to fail
#[derive(Debug, Default)]
pub struct MemoryBackend {
    snapshot: Mutex<Option<Vec<HistoryEntry>>>,
    failing: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing snapshot
    pub fn with_entries(entries: Vec<HistoryEntry>) -> Self {
        Self {
            snapshot: Mutex::new(Some(entries)),
            ..Self::default()
        }
    }

    /// Make every subsequent operation fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<Vec<HistoryEntry>> {
        self.snapshot.lock().ok().and_then(|s| s.clone())
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Persistence("memory backend set to fail".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryBackend for MemoryBackend {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn load(&self) -> Result<Option<Vec<HistoryEntry>>> {
        self.check()?;
        Ok(self.snapshot())
    }

    async fn save(&self, entries: &[HistoryEntry]) -> Result<()> {
        self.check()?;
        let mut snapshot = self
            .snapshot
            .lock()
            .map_err(|_| Error::Persistence("memory backend lock poisoned".into()))?;
        *snapshot = Some(entries.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.check()?;
        if let Ok(mut snapshot) = self.snapshot.lock() {
            *snapshot = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{NormalizedResult, SearchResult};
    use tempfile::TempDir;

    fn entry(query: &str, minutes_ago: i64) -> HistoryEntry {
        let stored_at = Utc::now() - chrono::Duration::minutes(minutes_ago);
        HistoryEntry {
            query: query.to_string(),
            result: SearchResult {
                query: query.to_string(),
                payload: Some(NormalizedResult {
                    sources: vec!["registry".into()],
                    summary: Some(format!("About {query}")),
                    ..Default::default()
                }),
                confidence: 0.7,
                latency_ms: 321,
                sources: vec!["registry".into()],
                provider: Some("primary".into()),
                completed_at: stored_at,
            },
            stored_at,
        }
    }

    #[tokio::test]
    async fn test_json_backend_missing_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("history.json"));
        assert!(backend.load().await.unwrap().is_none());
        backend.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_json_backend_preserves_entries() {
        let dir = TempDir::new().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("nested").join("history.json"));
        let entries = vec![entry("accra", 3), entry("kumasi", 1)];

        backend.save(&entries).await.unwrap();
        let loaded = backend.load().await.unwrap().unwrap();
        assert_eq!(loaded, entries);
        assert!(!backend.temp_path().exists());

        backend.clear().await.unwrap();
        assert!(backend.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_backend_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{ not an array").unwrap();

        let backend = JsonFileBackend::new(path);
        assert!(backend.load().await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_backend_upserts_by_query() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        assert!(backend.load().await.unwrap().is_none());

        backend.save(&[entry("accra", 5)]).await.unwrap();
        let mut newer = entry("accra", 0);
        newer.result.confidence = 0.9;
        backend.save(&[newer.clone(), entry("tamale", 2)]).await.unwrap();

        let loaded = backend.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        let accra = loaded.iter().find(|e| e.query == "accra").unwrap();
        assert_eq!(accra.result, newer.result);
        assert_eq!(accra.stored_at, newer.stored_at);

        backend.clear().await.unwrap();
        assert!(backend.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_backend_file_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("history.db");

        let backend = SqliteBackend::connect(&path).await.unwrap();
        backend.save(&[entry("accra", 1)]).await.unwrap();
        drop(backend);

        let reopened = SqliteBackend::connect(&path).await.unwrap();
        assert_eq!(reopened.load().await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_backend_failure_mode() {
        let backend = MemoryBackend::new();
        backend.save(&[entry("accra", 1)]).await.unwrap();
        assert_eq!(backend.save_count(), 1);

        backend.set_failing(true);
        assert!(backend.save(&[]).await.is_err());
        assert!(backend.load().await.is_err());
        assert_eq!(backend.save_count(), 1);
    }
}
