//! Collaborator interfaces.
//!
//! The backing triplestore and optional load service are always injected as
//! trait objects; nothing in the layer reaches for an ambient client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Media type requested for CONSTRUCT results.
pub const N_TRIPLES: &str = "application/n-triples";

/// Media type requested for SELECT/ASK results.
pub const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// Raw response of a passthrough query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreResponse {
    pub content_type: String,
    pub body: String,
}

/// A SPARQL 1.1 Query/Update endpoint.
///
/// The only guarantees relied upon are that one `update` call executes
/// atomically (all operations in the request or none) and that queries are
/// evaluated per the SPARQL 1.1 standard.
#[async_trait]
pub trait SparqlStore: Send + Sync {
    /// Execute one SPARQL Update request.
    async fn update(&self, sparql: &str) -> Result<()>;

    /// Execute an update expected to touch whole graphs (copies, loads).
    /// Implementations may apply a longer timeout.
    async fn update_bulk(&self, sparql: &str) -> Result<()> {
        self.update(sparql).await
    }

    /// Execute a CONSTRUCT query and return the N-Triples document.
    async fn construct(&self, sparql: &str) -> Result<String>;

    /// Execute a SELECT or ASK query and return the SPARQL JSON results document.
    async fn select(&self, sparql: &str) -> Result<String>;

    /// Execute an arbitrary (already sanitized) query, negotiating `accept`.
    async fn query(&self, sparql: &str, accept: &str) -> Result<StoreResponse>;
}

/// Optional collaborator that stages uploaded bytes where the store can
/// `LOAD` them from.
#[async_trait]
pub trait LoadService: Send + Sync {
    /// Store `bytes` and return a URL usable in `LOAD <url> INTO GRAPH <g>`.
    async fn stash(&self, bytes: Vec<u8>, content_type: &str) -> Result<String>;
}
