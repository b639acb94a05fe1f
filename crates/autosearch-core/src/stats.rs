//! Summary statistics over search history and the live dispatcher

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::history::HistoryEntry;

/// Window for `recent_searches`
pub const RECENT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchStats {
    /// Remembered queries
    pub total_searches: usize,
    /// Remembered queries completed in the last 24 hours
    pub recent_searches: usize,
    /// Mean confidence across remembered results; 0 when history is empty
    pub average_confidence: f64,
    /// Share of remembered results that carried a payload
    pub success_rate: f64,
    /// Triggers currently in flight
    pub active_searches: usize,
    /// Triggers waiting in the backlog
    pub queued_searches: usize,
}

impl SearchStats {
    pub fn compute(entries: &[HistoryEntry], active: usize, queued: usize) -> Self {
        Self::compute_at(entries, active, queued, Utc::now())
    }

    pub fn compute_at(
        entries: &[HistoryEntry],
        active: usize,
        queued: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let total = entries.len();
        let cutoff = now - Duration::hours(RECENT_WINDOW_HOURS);
        let recent = entries
            .iter()
            .filter(|e| e.result.completed_at > cutoff)
            .count();

        let (average_confidence, success_rate) = if total == 0 {
            (0.0, 0.0)
        } else {
            let confidence: f64 = entries.iter().map(|e| e.result.confidence).sum();
            let hits = entries.iter().filter(|e| !e.result.is_empty()).count();
            (confidence / total as f64, hits as f64 / total as f64)
        };

        Self {
            total_searches: total,
            recent_searches: recent,
            average_confidence,
            success_rate,
            active_searches: active,
            queued_searches: queued,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{NormalizedResult, SearchResult};

    fn entry(query: &str, confidence: f64, hit: bool, hours_ago: i64) -> HistoryEntry {
        let at = Utc::now() - Duration::hours(hours_ago);
        HistoryEntry {
            query: query.to_string(),
            result: SearchResult {
                query: query.to_string(),
                payload: hit.then(|| NormalizedResult {
                    summary: Some("x".into()),
                    ..Default::default()
                }),
                confidence,
                latency_ms: 10,
                sources: Vec::new(),
                provider: None,
                completed_at: at,
            },
            stored_at: at,
        }
    }

    #[test]
    fn test_empty_history() {
        let stats = SearchStats::compute(&[], 2, 5);
        assert_eq!(stats.total_searches, 0);
        assert_eq!(stats.average_confidence, 0.0);
        assert_eq!(stats.active_searches, 2);
        assert_eq!(stats.queued_searches, 5);
    }

    #[test]
    fn test_averages_and_recent_window() {
        let entries = vec![
            entry("tokyo", 0.8, true, 1),
            entry("paris", 0.6, true, 2),
            entry("lima", 0.0, false, 30),
        ];
        let stats = SearchStats::compute(&entries, 0, 0);

        assert_eq!(stats.total_searches, 3);
        assert_eq!(stats.recent_searches, 2);
        assert!((stats.average_confidence - 1.4 / 3.0).abs() < 1e-9);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
    }
}
