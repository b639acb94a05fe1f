//! Confidence scoring for search results
//!
//! A deterministic heuristic: a base for having any data at all, plus bonuses
//! for profile completeness, source count and a fast answer. It is not a
//! statistical estimate.

use std::time::Duration;

use crate::search::NormalizedResult;

const BASE: f64 = 0.5;
const PER_FIELD: f64 = 0.1;
const FIELD_CAP: f64 = 0.4;
const PER_SOURCE: f64 = 0.1;
const SOURCE_CAP: f64 = 0.2;
const FAST_BONUS: f64 = 0.1;
const FAST_THRESHOLD: Duration = Duration::from_millis(5000);

/// Scores result reliability in `[0, 1]`
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceScorer;

impl ConfidenceScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score a (possibly empty) payload given how long the search took
    pub fn score(&self, payload: Option<&NormalizedResult>, latency: Duration) -> f64 {
        let Some(result) = payload.filter(|r| !r.is_empty()) else {
            return 0.0;
        };

        let mut confidence = BASE;

        if let Some(profile) = &result.profile {
            let fields = [
                profile.has_leaders(),
                profile.has_economics(),
                profile.has_demographics(),
                profile.has_infrastructure(),
            ];
            let present = fields.iter().filter(|f| **f).count() as f64;
            confidence += (present * PER_FIELD).min(FIELD_CAP);
        }

        confidence += (result.sources.len() as f64 * PER_SOURCE).min(SOURCE_CAP);

        if latency < FAST_THRESHOLD {
            confidence += FAST_BONUS;
        }

        confidence.clamp(0.0, 1.0)
    }
}
