//! TTL-aware search history

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::search::{SearchResult, normalize_query};

/// One remembered search, keyed by normalized query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub query: String,
    pub result: SearchResult,
    pub stored_at: DateTime<Utc>,
}

/// In-memory history, at most one entry per normalized query
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    entries: HashMap<String, HistoryEntry>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries; the newest entry wins per key
    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        let mut store = Self::new();
        for mut entry in entries {
            entry.query = normalize_query(&entry.query);
            match store.entries.get(&entry.query) {
                Some(existing) if existing.stored_at >= entry.stored_at => {}
                _ => {
                    store.entries.insert(entry.query.clone(), entry);
                }
            }
        }
        store
    }

    /// Fresh result for a query, if one was stored less than `ttl` ago
    pub fn lookup(&self, query: &str, ttl: Duration) -> Option<&SearchResult> {
        self.lookup_at(query, ttl, Utc::now())
    }

    pub fn lookup_at(&self, query: &str, ttl: Duration, now: DateTime<Utc>) -> Option<&SearchResult> {
        let entry = self.entries.get(&normalize_query(query))?;
        let age = now.signed_duration_since(entry.stored_at);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => (age < ttl).then_some(&entry.result),
            // TTL too large to represent never expires
            Err(_) => Some(&entry.result),
        }
    }

    /// Remember a result, replacing any previous entry for the same query
    pub fn store(&mut self, result: SearchResult) {
        self.store_at(result, Utc::now());
    }

    pub fn store_at(&mut self, result: SearchResult, stored_at: DateTime<Utc>) {
        let key = normalize_query(&result.query);
        self.entries.insert(
            key.clone(),
            HistoryEntry {
                query: key,
                result,
                stored_at,
            },
        );
    }

    /// Entry for a query regardless of age
    pub fn get(&self, query: &str) -> Option<&HistoryEntry> {
        self.entries.get(&normalize_query(query))
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.stored_at.cmp(&b.stored_at).then(a.query.cmp(&b.query)));
        entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(query: &str, confidence: f64) -> SearchResult {
        SearchResult {
            query: query.to_string(),
            payload: None,
            confidence,
            latency_ms: 10,
            sources: Vec::new(),
            provider: None,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_lookup_within_ttl_is_a_hit() {
        let mut store = HistoryStore::new();
        let now = Utc::now();
        store.store_at(result("Tokyo", 0.8), now);

        let ttl = Duration::from_secs(300);
        let hit = store.lookup_at("tokyo", ttl, now + chrono::Duration::seconds(299));
        assert_eq!(hit.map(|r| r.confidence), Some(0.8));
    }

    #[test]
    fn test_lookup_at_ttl_boundary_is_a_miss() {
        let mut store = HistoryStore::new();
        let now = Utc::now();
        store.store_at(result("Tokyo", 0.8), now);

        let ttl = Duration::from_secs(300);
        assert!(store.lookup_at("Tokyo", ttl, now + chrono::Duration::seconds(300)).is_none());
        // Stale entries stay visible to `get`
        assert!(store.get("TOKYO").is_some());
    }

    #[test]
    fn test_store_overwrites_same_normalized_query() {
        let mut store = HistoryStore::new();
        store.store(result("Lagos", 0.2));
        store.store(result("  LAGOS ", 0.9));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("lagos").unwrap().result.confidence, 0.9);
    }

    #[test]
    fn test_from_entries_keeps_newest() {
        let old = Utc::now() - chrono::Duration::minutes(10);
        let new = Utc::now();
        let entries = vec![
            HistoryEntry {
                query: "Lima".into(),
                result: result("Lima", 0.9),
                stored_at: new,
            },
            HistoryEntry {
                query: "lima".into(),
                result: result("lima", 0.1),
                stored_at: old,
            },
        ];

        let store = HistoryStore::from_entries(entries);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("Lima").unwrap().result.confidence, 0.9);
    }

    #[test]
    fn test_entries_sorted_oldest_first_and_clear() {
        let mut store = HistoryStore::new();
        let now = Utc::now();
        store.store_at(result("b", 0.1), now);
        store.store_at(result("a", 0.1), now - chrono::Duration::seconds(5));

        let keys: Vec<String> = store.entries().into_iter().map(|e| e.query).collect();
        assert_eq!(keys, vec!["a", "b"]);

        store.clear();
        assert!(store.is_empty());
    }
}
