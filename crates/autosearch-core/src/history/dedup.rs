//! Admission-time deduplication
//!
//! A query is admitted only when history has no fresh result for it and no
//! trigger for the same normalized query is already queued or in flight.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::store::{HistoryEntry, HistoryStore};
use crate::search::{SearchResult, normalize_query};

/// Verdict for an incoming query
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Nothing known; run the chain
    Fresh,
    /// A result younger than the TTL exists
    Cached(SearchResult),
    /// Another trigger for this query has not finished yet
    Pending(Uuid),
}

/// History plus the set of outstanding queries
#[derive(Debug, Default)]
pub struct Deduplicator {
    history: HistoryStore,
    pending: HashMap<String, Uuid>,
}

impl Deduplicator {
    pub fn new(history: HistoryStore) -> Self {
        Self {
            history,
            pending: HashMap::new(),
        }
    }

    pub fn check(&self, query: &str, ttl: Duration) -> Admission {
        self.check_at(query, ttl, Utc::now())
    }

    pub fn check_at(&self, query: &str, ttl: Duration, now: DateTime<Utc>) -> Admission {
        if let Some(result) = self.history.lookup_at(query, ttl, now) {
            return Admission::Cached(result.clone());
        }
        match self.pending.get(&normalize_query(query)) {
            Some(id) => Admission::Pending(*id),
            None => Admission::Fresh,
        }
    }

    /// Record that a trigger for `query` has been admitted
    pub fn mark_pending(&mut self, query: &str, trigger_id: Uuid) {
        self.pending.insert(normalize_query(query), trigger_id);
    }

    /// Forget an outstanding trigger without storing a result
    pub fn release(&mut self, query: &str, trigger_id: Uuid) {
        let key = normalize_query(query);
        if self.pending.get(&key) == Some(&trigger_id) {
            self.pending.remove(&key);
        }
    }

    /// Store a completed result and clear the outstanding marker
    pub fn complete(&mut self, trigger_id: Uuid, result: SearchResult) {
        self.release(&result.query, trigger_id);
        self.history.store(result);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.history.entries()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}
