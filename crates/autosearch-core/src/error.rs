//! Error types for Autosearch

use thiserror::Error;

/// Result type alias using Autosearch's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Autosearch error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Admission errors (E001-E099)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Search backlog is full ({0} pending). Raise `max_backlog` or wait for searches to drain.")]
    BacklogFull(usize),

    // Execution errors (E100-E199)
    #[error("No search providers configured. Add a `[[providers]]` entry to config.toml.")]
    NoProviders,

    #[error("Search timed out after {0} ms")]
    Timeout(u64),

    #[error("Search executor fault: {0}")]
    ExecutorFault(String),

    #[error("Provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Network error: {0}. Check your internet connection.")]
    Network(#[from] reqwest::Error),

    // Persistence errors (E400-E499)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("History persistence failed: {0}")]
    Persistence(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "E001",
            Self::BacklogFull(_) => "E002",
            Self::NoProviders => "E100",
            Self::Timeout(_) => "E101",
            Self::ExecutorFault(_) => "E102",
            Self::Provider { .. } => "E103",
            Self::Network(_) => "E104",
            Self::Database(_) => "E400",
            Self::Persistence(_) => "E401",
            Self::ConfigError(_) => "E600",
            Self::Json(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NoProviders => Some("autosearch config init".to_string()),
            Self::BacklogFull(n) => Some(format!("set max_backlog above {} in config.toml", n)),
            Self::Timeout(ms) => Some(format!("set trigger_timeout_ms above {} in config.toml", ms)),
            Self::Network(_) => Some("Check internet connection".to_string()),
            Self::Persistence(_) | Self::Database(_) => Some("autosearch history clear".to_string()),
            _ => None,
        }
    }

    /// Whether this error was raised at a provider call boundary
    ///
    /// Provider-level errors are misses for the fallback chain, never faults.
    pub fn is_provider_error(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::Network(_))
    }
}
