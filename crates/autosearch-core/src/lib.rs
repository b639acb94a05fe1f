//! Autosearch Core Library
//!
//! Background search orchestration for location intelligence:
//! - Deduplicating, TTL-aware search history with pluggable persistence
//! - Priority backlog gated by a concurrency limit and a dispatch rate limit
//! - Ordered provider fallback chain with per-trigger timeout
//! - Confidence scoring of normalized results
//! - Lifecycle events delivered off the caller's stack
//! - Audit trail of terminal outcomes

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod executor;
pub mod history;
pub mod providers;
pub mod scoring;
pub mod search;
pub mod stats;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, SearchConfig};
    pub use crate::dispatch::{EngineSignal, SearchDispatcher, SubmitOutcome};
    pub use crate::error::{Error, Result};
    pub use crate::events::{SearchEvent, SearchEventKind};
    pub use crate::search::{Priority, ReportParams, SearchRequest, SearchResult};
}
