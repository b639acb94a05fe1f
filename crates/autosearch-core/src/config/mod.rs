//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Autosearch configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub search: SearchConfig,
    pub history: HistoryConfig,
    pub audit: AuditConfig,
    /// Ordered fallback chain; the first entry is tried first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ProviderConfig>,
}

/// Dispatch settings, adjustable while the dispatcher runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    pub trigger_on_input: bool,
    pub proactive_search_enabled: bool,
    pub feed_to_reports: bool,
    pub max_concurrent_searches: usize,
    pub min_dispatch_interval_ms: u64,
    pub cache_ttl_ms: u64,
    pub completion_cooldown_ms: u64,
    pub trigger_timeout_ms: u64,
    /// Unbounded when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backlog: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_on_input: true,
            proactive_search_enabled: true,
            feed_to_reports: true,
            max_concurrent_searches: 3,
            min_dispatch_interval_ms: 1000,
            cache_ttl_ms: 300_000,
            completion_cooldown_ms: 500,
            trigger_timeout_ms: 8000,
            max_backlog: None,
        }
    }
}

impl SearchConfig {
    pub fn min_dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.min_dispatch_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn completion_cooldown(&self) -> Duration {
        Duration::from_millis(self.completion_cooldown_ms)
    }

    pub fn trigger_timeout(&self) -> Duration {
        Duration::from_millis(self.trigger_timeout_ms)
    }

    /// Validate dispatch limits
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_searches == 0 {
            return Err(anyhow!("max_concurrent_searches must be at least 1"));
        }
        if self.cache_ttl_ms == 0 {
            return Err(anyhow!("cache_ttl_ms must be greater than 0"));
        }
        if self.trigger_timeout_ms == 0 {
            return Err(anyhow!("trigger_timeout_ms must be greater than 0"));
        }
        if self.max_backlog == Some(0) {
            return Err(anyhow!("max_backlog must be at least 1 when set"));
        }
        Ok(())
    }
}

/// Where search history is persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryBackendKind {
    #[default]
    Json,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub backend: HistoryBackendKind,
    /// Defaults to a file in the data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl HistoryConfig {
    /// Resolve the on-disk location for the configured backend
    pub fn resolved_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let file = match self.backend {
            HistoryBackendKind::Sqlite => "history.db",
            _ => "history.json",
        };
        Ok(Config::data_dir()?.join(file))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl AuditConfig {
    pub fn resolved_path(&self) -> anyhow::Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Config::data_dir()?.join("audit.jsonl")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Http,
    Fixture,
}

/// One link of the provider chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    /// Base URL for `http` providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// JSON file for `fixture` providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_timeout() -> u64 {
    10
}

impl ProviderConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("Provider name must not be empty"));
        }
        match self.kind {
            ProviderKind::Http if self.endpoint.is_none() => {
                Err(anyhow!("Provider '{}' is http but has no endpoint", self.name))
            }
            ProviderKind::Fixture if self.path.is_none() => {
                Err(anyhow!("Provider '{}' is fixture but has no path", self.name))
            }
            _ => Ok(()),
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("AUTOSEARCH_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("autosearch")
        };
        Ok(dir)
    }

    /// Get the data directory used for history and audit files
    pub fn data_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("AUTOSEARCH_DATA_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::data_dir()
                .ok_or_else(|| anyhow!("Could not determine data directory"))?
                .join("autosearch")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file, or defaults if absent
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            // Return default config without creating file
            Ok(Config::default())
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.search.validate()?;

        let mut names = std::collections::HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !names.insert(provider.name.as_str()) {
                return Err(anyhow!("Duplicate provider name: {}", provider.name));
            }
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let s = &self.search;
        match key {
            "search.enabled" => Ok(s.enabled.to_string()),
            "search.trigger_on_input" => Ok(s.trigger_on_input.to_string()),
            "search.proactive_search_enabled" => Ok(s.proactive_search_enabled.to_string()),
            "search.feed_to_reports" => Ok(s.feed_to_reports.to_string()),
            "search.max_concurrent_searches" => Ok(s.max_concurrent_searches.to_string()),
            "search.min_dispatch_interval_ms" => Ok(s.min_dispatch_interval_ms.to_string()),
            "search.cache_ttl_ms" => Ok(s.cache_ttl_ms.to_string()),
            "search.completion_cooldown_ms" => Ok(s.completion_cooldown_ms.to_string()),
            "search.trigger_timeout_ms" => Ok(s.trigger_timeout_ms.to_string()),
            "search.max_backlog" => Ok(s
                .max_backlog
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unbounded".to_string())),
            "history.backend" => Ok(format!("{:?}", self.history.backend).to_lowercase()),
            "audit.enabled" => Ok(self.audit.enabled.to_string()),
            "providers" => Ok(self
                .providers
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")),
            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `autosearch config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let s = &mut self.search;
        match key {
            "search.enabled" => s.enabled = parse_bool(key, value)?,
            "search.trigger_on_input" => s.trigger_on_input = parse_bool(key, value)?,
            "search.proactive_search_enabled" => {
                s.proactive_search_enabled = parse_bool(key, value)?
            }
            "search.feed_to_reports" => s.feed_to_reports = parse_bool(key, value)?,
            "search.max_concurrent_searches" => {
                s.max_concurrent_searches = parse_num(key, value)?;
            }
            "search.min_dispatch_interval_ms" => {
                s.min_dispatch_interval_ms = parse_num(key, value)?;
            }
            "search.cache_ttl_ms" => s.cache_ttl_ms = parse_num(key, value)?,
            "search.completion_cooldown_ms" => s.completion_cooldown_ms = parse_num(key, value)?,
            "search.trigger_timeout_ms" => s.trigger_timeout_ms = parse_num(key, value)?,
            "search.max_backlog" => {
                s.max_backlog = match value {
                    "unbounded" | "none" | "" => None,
                    v => Some(parse_num(key, v)?),
                };
            }
            "history.backend" => {
                self.history.backend = match value {
                    "json" => HistoryBackendKind::Json,
                    "sqlite" => HistoryBackendKind::Sqlite,
                    "memory" => HistoryBackendKind::Memory,
                    other => {
                        return Err(anyhow!(
                            "Invalid history backend: {}. Valid options: json, sqlite, memory",
                            other
                        ));
                    }
                };
            }
            "audit.enabled" => self.audit.enabled = parse_bool(key, value)?,
            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `autosearch config list` to see available keys.",
                    key
                ));
            }
        }
        self.validate()
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "search.enabled",
            "search.trigger_on_input",
            "search.proactive_search_enabled",
            "search.feed_to_reports",
            "search.max_concurrent_searches",
            "search.min_dispatch_interval_ms",
            "search.cache_ttl_ms",
            "search.completion_cooldown_ms",
            "search.trigger_timeout_ms",
            "search.max_backlog",
            "history.backend",
            "audit.enabled",
            "providers",
        ];

        keys.into_iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    value
        .parse()
        .with_context(|| format!("Invalid {} value: {} (expected true or false)", key, value))
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert!(config.search.enabled);
        assert_eq!(config.search.max_concurrent_searches, 3);
        assert_eq!(config.search.min_dispatch_interval(), Duration::from_secs(1));
        assert_eq!(config.search.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.search.completion_cooldown(), Duration::from_millis(500));
        assert!(config.search.max_backlog.is_none());
        assert!(config.providers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.search.max_concurrent_searches = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_incomplete_provider() {
        let mut config = Config::default();
        config.providers.push(ProviderConfig {
            name: "primary".into(),
            kind: ProviderKind::Http,
            endpoint: None,
            path: None,
            timeout_secs: 5,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_provider_names() {
        let provider = ProviderConfig {
            name: "deep".into(),
            kind: ProviderKind::Fixture,
            endpoint: None,
            path: Some("deep.json".into()),
            timeout_secs: 5,
        };
        let mut config = Config::default();
        config.providers = vec![provider.clone(), provider];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate provider name"));
    }

    #[test]
    fn test_parse_sparse_toml() {
        let toml = r#"
            [search]
            max_concurrent_searches = 5

            [[providers]]
            name = "primary"
            kind = "http"
            endpoint = "http://localhost:9000/search"

            [[providers]]
            name = "offline"
            kind = "fixture"
            path = "fixtures.json"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.search.max_concurrent_searches, 5);
        assert_eq!(config.search.min_dispatch_interval_ms, 1000);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].timeout_secs, 10);
        assert_eq!(config.providers[1].kind, ProviderKind::Fixture);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.search.max_backlog = Some(20);
        config.history.backend = HistoryBackendKind::Sqlite;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_get_set_values() {
        let mut config = Config::default();
        config.set("search.max_concurrent_searches", "7").unwrap();
        assert_eq!(config.get("search.max_concurrent_searches").unwrap(), "7");

        config.set("search.max_backlog", "50").unwrap();
        assert_eq!(config.get("search.max_backlog").unwrap(), "50");
        config.set("search.max_backlog", "unbounded").unwrap();
        assert_eq!(config.get("search.max_backlog").unwrap(), "unbounded");

        config.set("history.backend", "sqlite").unwrap();
        assert_eq!(config.get("history.backend").unwrap(), "sqlite");
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set("search.enabled", "maybe").is_err());
        assert!(config.set("search.max_concurrent_searches", "0").is_err());
        assert!(config.set("history.backend", "redis").is_err());
        assert!(config.set("unknown.key", "1").is_err());
    }

    #[test]
    fn test_list_covers_every_key() {
        let list = Config::default().list().unwrap();
        assert_eq!(list.len(), 13);
        assert!(list.iter().any(|(k, v)| k == "search.cache_ttl_ms" && v == "300000"));
    }
}
