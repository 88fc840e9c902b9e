//! Store connection configuration.

use mms_core::defaults;

/// Configuration for [`crate::HttpSparqlStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// SPARQL query endpoint.
    pub query_url: String,
    /// SPARQL update endpoint.
    pub update_url: String,
    /// Timeout for ordinary queries and updates (seconds).
    pub timeout_secs: u64,
    /// Timeout for bulk updates such as graph copies and loads (seconds).
    pub bulk_timeout_secs: u64,
    /// Value sent verbatim as the `Authorization` header, if set.
    pub auth_header: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            query_url: defaults::STORE_QUERY_URL.to_string(),
            update_url: defaults::STORE_UPDATE_URL.to_string(),
            timeout_secs: defaults::STORE_TIMEOUT_SECS,
            bulk_timeout_secs: defaults::STORE_BULK_TIMEOUT_SECS,
            auth_header: None,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `MMS_QUERY_URL` | `http://localhost:7200/sparql` |
    /// | `MMS_UPDATE_URL` | value of `MMS_QUERY_URL` |
    /// | `MMS_STORE_TIMEOUT_SECS` | 60 |
    /// | `MMS_STORE_BULK_TIMEOUT_SECS` | 1800 |
    /// | `MMS_STORE_AUTH_HEADER` | (none) |
    pub fn from_env() -> Self {
        let query_url =
            std::env::var("MMS_QUERY_URL").unwrap_or_else(|_| defaults::STORE_QUERY_URL.to_string());
        let update_url = std::env::var("MMS_UPDATE_URL").unwrap_or_else(|_| query_url.clone());

        Self {
            query_url,
            update_url,
            timeout_secs: std::env::var("MMS_STORE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::STORE_TIMEOUT_SECS),
            bulk_timeout_secs: std::env::var("MMS_STORE_BULK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::STORE_BULK_TIMEOUT_SECS),
            auth_header: std::env::var("MMS_STORE_AUTH_HEADER")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }

    /// Point both endpoints at one URL.
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.query_url = url.clone();
        self.update_url = url;
        self
    }

    pub fn with_update_url(mut self, url: impl Into<String>) -> Self {
        self.update_url = url.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_bulk_timeout_secs(mut self, secs: u64) -> Self {
        self.bulk_timeout_secs = secs;
        self
    }

    pub fn with_auth_header(mut self, value: impl Into<String>) -> Self {
        self.auth_header = Some(value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.timeout_secs, defaults::STORE_TIMEOUT_SECS);
        assert_eq!(config.bulk_timeout_secs, defaults::STORE_BULK_TIMEOUT_SECS);
        assert!(config.auth_header.is_none());
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::default()
            .with_endpoint("http://store:7200/repositories/mms")
            .with_update_url("http://store:7200/repositories/mms/statements")
            .with_timeout_secs(5)
            .with_auth_header("Basic abc");
        assert_eq!(config.query_url, "http://store:7200/repositories/mms");
        assert_eq!(
            config.update_url,
            "http://store:7200/repositories/mms/statements"
        );
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.auth_header.as_deref(), Some("Basic abc"));
    }
}
