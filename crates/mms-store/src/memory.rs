//! Embedded in-memory SPARQL store.
//!
//! Backed by an `oxigraph` store without persistent storage. Each update
//! request runs in one oxigraph transaction, which gives the same
//! all-or-nothing guarantee the engine relies on from a remote store.
//! Useful for development servers and for running the engine's queries
//! end to end in tests.

use std::time::Instant;

use async_trait::async_trait;
use oxigraph::io::RdfFormat;
use oxigraph::sparql::results::QueryResultsFormat;
use oxigraph::sparql::{EvaluationError, QueryResults};
use oxigraph::store::Store;
use tracing::{debug, info, instrument, warn};

use mms_core::{Error, Result, SparqlStore, StoreResponse, N_TRIPLES, SPARQL_RESULTS_JSON};

const TURTLE: &str = "text/turtle";

/// [`SparqlStore`] over an embedded oxigraph store.
///
/// Clones share the same data.
#[derive(Clone)]
pub struct MemorySparqlStore {
    store: Store,
}

impl MemorySparqlStore {
    pub fn new() -> Result<Self> {
        let store = Store::new().map_err(|e| Error::Config(format!("Failed to create memory store: {}", e)))?;
        info!(subsystem = "store", component = "memory", "Initializing in-memory SPARQL store");
        Ok(Self { store })
    }

    /// Number of quads across all graphs.
    pub fn len(&self) -> Result<usize> {
        self.store.len().map_err(|e| Error::Internal(format!("memory store: {}", e)))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Run `f` on the blocking pool so concurrent requests really overlap.
    async fn blocking<T, F>(&self, op: &'static str, sparql: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store, &str) -> std::result::Result<T, EvaluationError> + Send + 'static,
    {
        let store = self.store.clone();
        let sparql = sparql.to_string();
        let start = Instant::now();
        let len = sparql.len();
        let out = tokio::task::spawn_blocking(move || f(&store, &sparql))
            .await
            .map_err(|e| Error::Internal(format!("memory store task failed: {}", e)))?
            .map_err(store_error);
        debug!(op, duration_ms = start.elapsed().as_millis() as u64, request_len = len, "Store call complete");
        out
    }
}

fn store_error(e: EvaluationError) -> Error {
    let status = match e {
        EvaluationError::Parsing(_) => 400,
        _ => 500,
    };
    let body = e.to_string();
    warn!(subsystem = "store", component = "memory", status, error = %body, "Store rejected request");
    Error::Store { status, body }
}

fn serialization(e: impl std::fmt::Display) -> EvaluationError {
    EvaluationError::ResultsSerialization(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

fn utf8(bytes: Vec<u8>) -> std::result::Result<String, EvaluationError> {
    String::from_utf8(bytes).map_err(serialization)
}

/// Graph results as `format`.
fn write_graph(results: QueryResults, format: RdfFormat) -> std::result::Result<String, EvaluationError> {
    utf8(results.write_graph(Vec::new(), format)?)
}

/// Solutions or a boolean as SPARQL results JSON.
fn write_results(results: QueryResults) -> std::result::Result<String, EvaluationError> {
    match results {
        QueryResults::Graph(_) => Err(serialization("expected solutions, got a graph")),
        results => utf8(results.write(Vec::new(), QueryResultsFormat::Json)?),
    }
}

/// Pick the first graph format in `accept` this store can write.
fn graph_format(accept: &str) -> (RdfFormat, &'static str) {
    for range in accept.split(',').map(|r| r.split(';').next().unwrap_or("").trim()) {
        match range {
            N_TRIPLES => return (RdfFormat::NTriples, N_TRIPLES),
            TURTLE => return (RdfFormat::Turtle, TURTLE),
            _ => {}
        }
    }
    (RdfFormat::Turtle, TURTLE)
}

#[async_trait]
impl SparqlStore for MemorySparqlStore {
    #[instrument(skip(self, sparql), fields(subsystem = "store", component = "memory", op = "update", request_len = sparql.len()))]
    async fn update(&self, sparql: &str) -> Result<()> {
        self.blocking("update", sparql, |store, sparql| store.update(sparql)).await
    }

    #[instrument(skip(self, sparql), fields(subsystem = "store", component = "memory", op = "construct", request_len = sparql.len()))]
    async fn construct(&self, sparql: &str) -> Result<String> {
        self.blocking("construct", sparql, |store, sparql| {
            write_graph(store.query(sparql)?, RdfFormat::NTriples)
        })
        .await
    }

    #[instrument(skip(self, sparql), fields(subsystem = "store", component = "memory", op = "select", request_len = sparql.len()))]
    async fn select(&self, sparql: &str) -> Result<String> {
        self.blocking("select", sparql, |store, sparql| write_results(store.query(sparql)?))
            .await
    }

    #[instrument(skip(self, sparql), fields(subsystem = "store", component = "memory", op = "query", request_len = sparql.len()))]
    async fn query(&self, sparql: &str, accept: &str) -> Result<StoreResponse> {
        let (format, graph_type) = graph_format(accept);
        self.blocking("query", sparql, move |store, sparql| match store.query(sparql)? {
            results @ QueryResults::Graph(_) => Ok(StoreResponse {
                content_type: graph_type.to_string(),
                body: write_graph(results, format)?,
            }),
            results => Ok(StoreResponse {
                content_type: SPARQL_RESULTS_JSON.to_string(),
                body: write_results(results)?,
            }),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_then_construct() {
        let store = MemorySparqlStore::new().unwrap();
        store
            .update("INSERT DATA { GRAPH <urn:g> { <urn:a> <urn:b> \"c\" } }")
            .await
            .unwrap();
        assert_eq!(store.len().unwrap(), 1);

        let nt = store
            .construct("CONSTRUCT { ?s ?p ?o } WHERE { GRAPH <urn:g> { ?s ?p ?o } }")
            .await
            .unwrap();
        assert_eq!(nt.trim(), "<urn:a> <urn:b> \"c\" .");
    }

    #[tokio::test]
    async fn test_select_returns_json_results() {
        let store = MemorySparqlStore::new().unwrap();
        store
            .update("INSERT DATA { GRAPH <urn:g> { <urn:a> <urn:b> <urn:c> } }")
            .await
            .unwrap();
        let json = store
            .select("SELECT ?s WHERE { GRAPH <urn:g> { ?s ?p ?o } }")
            .await
            .unwrap();
        let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(doc["results"]["bindings"][0]["s"]["value"], "urn:a");

        let ask = store.select("ASK { GRAPH <urn:g> { ?s ?p ?o } }").await.unwrap();
        assert!(ask.contains("true"));
    }

    #[tokio::test]
    async fn test_failed_update_changes_nothing() {
        let store = MemorySparqlStore::new().unwrap();
        let err = store
            .update("INSERT DATA { GRAPH <urn:g> { <urn:a> <urn:b> <urn:c> } } ; DROP GRAPH <urn:missing>")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store { status: 500, .. }));
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_bad_syntax_is_a_client_error() {
        let store = MemorySparqlStore::new().unwrap();
        let err = store.select("SELEKT").await.unwrap_err();
        assert!(matches!(err, Error::Store { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_query_negotiates_graph_format() {
        let store = MemorySparqlStore::new().unwrap();
        store
            .update("INSERT DATA { <urn:a> <urn:b> <urn:c> }")
            .await
            .unwrap();
        let response = store
            .query("CONSTRUCT WHERE { ?s ?p ?o }", "application/n-triples, text/turtle")
            .await
            .unwrap();
        assert_eq!(response.content_type, N_TRIPLES);
        assert!(response.body.contains("<urn:a> <urn:b> <urn:c>"));
    }
}
