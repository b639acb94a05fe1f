//! Search history and deduplication
//!
//! - [`HistoryStore`]: TTL-aware cache of query -> last result
//! - [`Deduplicator`]: admission check against history and outstanding work
//! - [`HistoryBackend`]: durable snapshot storage (JSON file, SQLite, memory)

mod backend;
mod dedup;
mod store;

use std::path::Path;
use std::sync::Arc;

pub use backend::{
    CREATE_SEARCH_HISTORY_TABLE_SQL, HistoryBackend, JsonFileBackend, MemoryBackend,
    SqliteBackend,
};
pub use dedup::{Admission, Deduplicator};
pub use store::{HistoryEntry, HistoryStore};

use crate::config::{HistoryBackendKind, HistoryConfig};
use crate::error::{Error, Result};

/// Open the backend selected by configuration
pub async fn open_backend(config: &HistoryConfig) -> Result<Arc<dyn HistoryBackend>> {
    match config.backend {
        HistoryBackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        kind => {
            let path = config
                .resolved_path()
                .map_err(|e| Error::ConfigError(e.to_string()))?;
            open_file_backend(kind, &path).await
        }
    }
}

async fn open_file_backend(kind: HistoryBackendKind, path: &Path) -> Result<Arc<dyn HistoryBackend>> {
    match kind {
        HistoryBackendKind::Sqlite => Ok(Arc::new(SqliteBackend::connect(path).await?)),
        _ => Ok(Arc::new(JsonFileBackend::new(path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_backend_by_kind() {
        let dir = TempDir::new().unwrap();

        let json = open_backend(&HistoryConfig {
            backend: HistoryBackendKind::Json,
            path: Some(dir.path().join("h.json")),
        })
        .await
        .unwrap();
        assert!(json.describe().starts_with("json:"));

        let sqlite = open_backend(&HistoryConfig {
            backend: HistoryBackendKind::Sqlite,
            path: Some(dir.path().join("h.db")),
        })
        .await
        .unwrap();
        assert_eq!(sqlite.describe(), "sqlite");

        let memory = open_backend(&HistoryConfig {
            backend: HistoryBackendKind::Memory,
            path: None,
        })
        .await
        .unwrap();
        assert_eq!(memory.describe(), "memory");
    }
}
