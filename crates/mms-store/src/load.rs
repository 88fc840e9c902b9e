//! HTTP load service adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use mms_core::{defaults, Error, LoadService, Result};

#[derive(Deserialize)]
struct StashResponse {
    url: String,
}

/// Posts uploaded documents to a staging service which answers
/// `{"url": "..."}` with a location the store can `LOAD` from.
pub struct HttpLoadService {
    client: Client,
    endpoint: String,
    timeout_secs: u64,
}

impl HttpLoadService {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout_secs: defaults::STORE_BULK_TIMEOUT_SECS,
        })
    }

    /// `None` when `MMS_LOAD_SERVICE_URL` is unset or empty.
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var("MMS_LOAD_SERVICE_URL") {
            Ok(url) if !url.is_empty() => Self::new(url).map(Some),
            _ => Ok(None),
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[async_trait]
impl LoadService for HttpLoadService {
    #[instrument(skip(self, bytes), fields(subsystem = "store", component = "load_service", op = "stash", request_len = bytes.len()))]
    async fn stash(&self, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(Duration::from_secs(self.timeout_secs))
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Store {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: StashResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Invalid load service response: {}", e)))?;
        debug!(url = %parsed.url, "Document staged for LOAD");
        Ok(parsed.url)
    }
}
