//! HTTP provider: asks a remote lookup service for a normalized result

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::SearchProvider;
use crate::error::{Error, Result};
use crate::search::NormalizedResult;

/// Provider backed by `GET {endpoint}?q={query}` returning `NormalizedResult` JSON
#[derive(Debug, Clone)]
pub struct HttpProvider {
    name: String,
    endpoint: String,
    client: Client,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SearchProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str) -> Result<Option<NormalizedResult>> {
        debug!(provider = %self.name, endpoint = %self.endpoint, "Sending lookup request");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let result: Option<NormalizedResult> = response.json().await?;
                Ok(result)
            }
            status => Err(Error::Provider {
                provider: self.name.clone(),
                message: format!("unexpected status {}", status),
            }),
        }
    }
}
