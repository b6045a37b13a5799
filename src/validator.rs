use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Cheap pre-check that an image URL answers before it is classified.
#[async_trait]
pub trait UrlValidator: Send + Sync {
    async fn is_reachable(&self, url: &str) -> bool;
}

/// Issues a HEAD request and accepts any 2xx answer.
pub struct HttpUrlValidator {
    client: Client,
}

impl HttpUrlValidator {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build URL validation client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UrlValidator for HttpUrlValidator {
    async fn is_reachable(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(url = %url, status = %response.status(), "URL is not accessible");
                false
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Error validating URL");
                false
            }
        }
    }
}
