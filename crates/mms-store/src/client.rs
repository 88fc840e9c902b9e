//! SPARQL 1.1 Protocol client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, info, instrument, warn};

use mms_core::defaults::STORE_SLOW_MS;
use mms_core::{Error, Result, SparqlStore, StoreResponse, N_TRIPLES, SPARQL_RESULTS_JSON};

use crate::config::StoreConfig;

const SPARQL_QUERY: &str = "application/sparql-query";
const SPARQL_UPDATE: &str = "application/sparql-update";

/// [`SparqlStore`] over HTTP.
///
/// Queries and updates are sent as direct POST bodies. Every call carries its
/// own timeout; a timed-out update has an indeterminate outcome and is
/// reported as [`Error::Timeout`] without retrying.
pub struct HttpSparqlStore {
    client: Client,
    config: StoreConfig,
}

impl HttpSparqlStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "store",
            query_url = %config.query_url,
            update_url = %config.update_url,
            timeout_secs = config.timeout_secs,
            "Initializing SPARQL store client"
        );

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(StoreConfig::from_env())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn post(&self, url: &str, content_type: &str, timeout_secs: u64) -> RequestBuilder {
        let mut req = self
            .client
            .post(url)
            .timeout(Duration::from_secs(timeout_secs))
            .header(CONTENT_TYPE, content_type);
        if let Some(ref auth) = self.config.auth_header {
            req = req.header(AUTHORIZATION, auth);
        }
        req
    }

    async fn send_update(&self, sparql: &str, timeout_secs: u64) -> Result<()> {
        let start = Instant::now();
        let response = self
            .post(&self.config.update_url, SPARQL_UPDATE, timeout_secs)
            .body(sparql.to_string())
            .send()
            .await?;
        check_status(response).await?;
        log_duration("update", start, sparql.len());
        Ok(())
    }

    async fn send_query(&self, sparql: &str, accept: &str) -> Result<Response> {
        let start = Instant::now();
        let response = self
            .post(&self.config.query_url, SPARQL_QUERY, self.config.timeout_secs)
            .header(ACCEPT, accept)
            .body(sparql.to_string())
            .send()
            .await?;
        let response = check_status(response).await?;
        log_duration("query", start, sparql.len());
        Ok(response)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(
        subsystem = "store",
        status = status.as_u16(),
        error = %body,
        "Store returned error status"
    );
    Err(Error::Store {
        status: status.as_u16(),
        body,
    })
}

fn log_duration(op: &str, start: Instant, request_len: usize) {
    let elapsed = start.elapsed().as_millis() as u64;
    debug!(op, duration_ms = elapsed, request_len, "Store call complete");
    if elapsed > STORE_SLOW_MS {
        warn!(
            op,
            duration_ms = elapsed,
            request_len,
            slow = true,
            "Slow store operation"
        );
    }
}

#[async_trait]
impl SparqlStore for HttpSparqlStore {
    #[instrument(skip(self, sparql), fields(subsystem = "store", component = "http", op = "update", request_len = sparql.len()))]
    async fn update(&self, sparql: &str) -> Result<()> {
        self.send_update(sparql, self.config.timeout_secs).await
    }

    #[instrument(skip(self, sparql), fields(subsystem = "store", component = "http", op = "update_bulk", request_len = sparql.len()))]
    async fn update_bulk(&self, sparql: &str) -> Result<()> {
        self.send_update(sparql, self.config.bulk_timeout_secs).await
    }

    #[instrument(skip(self, sparql), fields(subsystem = "store", component = "http", op = "construct", request_len = sparql.len()))]
    async fn construct(&self, sparql: &str) -> Result<String> {
        let response = self.send_query(sparql, N_TRIPLES).await?;
        Ok(response.text().await?)
    }

    #[instrument(skip(self, sparql), fields(subsystem = "store", component = "http", op = "select", request_len = sparql.len()))]
    async fn select(&self, sparql: &str) -> Result<String> {
        let response = self.send_query(sparql, SPARQL_RESULTS_JSON).await?;
        Ok(response.text().await?)
    }

    #[instrument(skip(self, sparql), fields(subsystem = "store", component = "http", op = "query", request_len = sparql.len()))]
    async fn query(&self, sparql: &str, accept: &str) -> Result<StoreResponse> {
        let response = self.send_query(sparql, accept).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(accept)
            .to_string();
        let body = response.text().await?;
        Ok(StoreResponse { content_type, body })
    }
}
