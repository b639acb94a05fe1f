//! Search providers
//!
//! A provider answers one query with a normalized result or nothing. The
//! dispatcher never looks inside a provider; it only cares whether a result
//! came back. Providers are chained in configuration order.

mod fixture;
mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{Error, Result};
use crate::search::NormalizedResult;

pub use fixture::FixtureProvider;
pub use http::HttpProvider;

/// A data source that can be tried as one link of the fallback chain
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Name used in logs, audit records and `SearchResult::provider`
    fn name(&self) -> &str;

    /// Look up a query. `Ok(None)` means "nothing found".
    async fn search(&self, query: &str) -> Result<Option<NormalizedResult>>;
}

/// Shared provider handle
pub type ProviderRef = Arc<dyn SearchProvider>;

/// Build the ordered provider chain from configuration
pub fn from_config(configs: &[ProviderConfig]) -> Result<Vec<ProviderRef>> {
    configs
        .iter()
        .map(|config| -> Result<ProviderRef> {
            config
                .validate()
                .map_err(|e| Error::ConfigError(e.to_string()))?;
            match config.kind {
                ProviderKind::Http => {
                    let endpoint = config.endpoint.as_deref().unwrap_or_default();
                    Ok(Arc::new(HttpProvider::new(
                        &config.name,
                        endpoint,
                        Duration::from_secs(config.timeout_secs),
                    )?))
                }
                ProviderKind::Fixture => {
                    let path = config.path.as_deref().ok_or_else(|| {
                        Error::ConfigError(format!("Provider '{}' has no path", config.name))
                    })?;
                    Ok(Arc::new(FixtureProvider::from_file(&config.name, path)?))
                }
            }
        })
        .collect()
}
