use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use std::time::Duration;
use tracing::debug;

use crate::error::StorageError;

/// Fetches audio from the network.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Download `url`, bypassing any HTTP cache along the way.
    async fn fetch_fresh(&self, url: &str) -> Result<Vec<u8>, StorageError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl AudioFetcher for HttpFetcher {
    async fn fetch_fresh(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        debug!("Fetching {}", url);
        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StorageError::Fetch(e.to_string()))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| StorageError::Fetch(e.to_string()))?;
        Ok(body.to_vec())
    }
}
