//! Fixture provider: serves canned results from a JSON file

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use async_trait::async_trait;

use super::SearchProvider;
use crate::error::Result;
use crate::search::{NormalizedResult, normalize_query};

/// Provider that answers from an in-memory map of query -> result
///
/// The file format is a JSON object keyed by query. Keys are matched
/// case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct FixtureProvider {
    name: String,
    results: HashMap<String, NormalizedResult>,
}

impl FixtureProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            results: HashMap::new(),
        }
    }

    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let raw: HashMap<String, NormalizedResult> = serde_json::from_str(&contents)?;
        let mut provider = Self::new(name);
        for (query, result) in raw {
            provider = provider.with_result(&query, result);
        }
        Ok(provider)
    }

    pub fn with_result(mut self, query: &str, result: NormalizedResult) -> Self {
        self.results.insert(normalize_query(query), result);
        self
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[async_trait]
impl SearchProvider for FixtureProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str) -> Result<Option<NormalizedResult>> {
        Ok(self.results.get(&normalize_query(query)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let provider = FixtureProvider::new("offline").with_result(
            "Nairobi",
            NormalizedResult {
                summary: Some("Capital of Kenya".into()),
                ..Default::default()
            },
        );

        let hit = provider.search("  NAIROBI ").await.unwrap();
        assert_eq!(hit.unwrap().summary.as_deref(), Some("Capital of Kenya"));
        assert!(provider.search("Mombasa").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"Tokyo": {{"sources": ["stat.go.jp"], "summary": "Capital"}}, "Kyoto": {{}}}}"#
        )
        .unwrap();

        let provider = FixtureProvider::from_file("offline", file.path()).unwrap();
        assert_eq!(provider.len(), 2);
        let tokyo = provider.search("tokyo").await.unwrap().unwrap();
        assert_eq!(tokyo.sources, vec!["stat.go.jp".to_string()]);
    }

    #[test]
    fn test_from_file_rejects_malformed_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(FixtureProvider::from_file("offline", file.path()).is_err());
    }
}
