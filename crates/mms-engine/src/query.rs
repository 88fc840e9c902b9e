//! Read-only access to a ref's model: client queries and whole-graph reads.
//!
//! The ref is resolved to its graph first. The client query is then
//! rewritten to run against that graph alone, with the caller's permission
//! and the ref's pointer to the graph checked inside the same store query.
//! A response without the authorization marker is answered like a failed
//! permission check.

use tracing::debug;

use mms_core::vocab::prop;
use mms_core::{Error, RefAddress, RefKind, Result, StoreResponse, SPARQL_RESULTS_JSON};
use mms_sparql::rdf::{self, TURTLE};
use mms_sparql::{tp, ClientQuery, GraphPattern, GuardedAnswer, QueryForm, RdfFormat, Term, Triple};

use crate::access::{chain_terms, permission_pattern};
use crate::context::RequestContext;
use crate::engine::Engine;
use crate::refs::read_permission;

const WHOLE_MODEL: &str = "CONSTRUCT WHERE { ?s ?p ?o }";

/// Response type used when the client does not ask for one.
pub fn default_accept(form: QueryForm) -> &'static str {
    match form {
        QueryForm::Select | QueryForm::Ask => SPARQL_RESULTS_JSON,
        QueryForm::Construct | QueryForm::Describe => TURTLE,
    }
}

/// Graph behind a ref and the pattern holding while the ref still points at it.
struct ModelGraph {
    graph: String,
    pointer: GraphPattern,
}

/// Result encoding for `form` given the client's acceptable types, most
/// preferred first.
fn response_format(form: QueryForm, accept: Option<&str>) -> Result<Option<RdfFormat>> {
    let ranges: Vec<&str> = accept
        .map(|a| a.split(',').map(str::trim).filter(|r| !r.is_empty()).collect())
        .unwrap_or_default();
    match form {
        QueryForm::Select | QueryForm::Ask => {
            if ranges.is_empty() || ranges.contains(&SPARQL_RESULTS_JSON) {
                Ok(None)
            } else {
                Err(Error::NotAcceptable(format!(
                    "{:?} queries answer with {} only",
                    form, SPARQL_RESULTS_JSON
                )))
            }
        }
        QueryForm::Construct | QueryForm::Describe => {
            if ranges.is_empty() {
                return Ok(Some(RdfFormat::Turtle));
            }
            ranges
                .iter()
                .find_map(|r| RdfFormat::from_media_type(r))
                .map(Some)
                .ok_or_else(|| Error::NotAcceptable(format!("{:?} queries answer with RDF graphs only", form)))
        }
    }
}

impl Engine {
    /// A branch's Staging graph, or the Model snapshot of a lock's commit.
    async fn model_graph(&self, ctx: &RequestContext, r: &RefAddress) -> Result<ModelGraph> {
        let (_, state) = self.ref_description(ctx, r, read_permission(r.kind)).await?;
        let metadata = self.iris().repo_metadata_graph(&r.repo);
        match (r.kind, state.staging) {
            (RefKind::Branch, Some(staging)) => {
                let snap = Term::var("__mms_snap");
                let pointer = GraphPattern::graph(
                    metadata,
                    GraphPattern::triples([
                        tp(state.iri.as_str(), prop::SNAPSHOT, snap.clone()),
                        tp(snap, prop::GRAPH, Term::iri(staging.as_str())),
                    ]),
                );
                Ok(ModelGraph { graph: staging, pointer })
            }
            (RefKind::Branch, None) => Err(Error::ServerBug(format!("Branch {} has no Staging snapshot", r))),
            (RefKind::Lock, _) => {
                let graph = self.resolve_commit_graph(&r.repo, &state.commit).await?;
                let pointer = GraphPattern::graph(
                    metadata,
                    GraphPattern::triples([tp(state.iri.as_str(), prop::COMMIT, Term::iri(state.commit.as_str()))]),
                );
                Ok(ModelGraph { graph, pointer })
            }
        }
    }

    /// Run `query` against the model of `r` with the read check inline.
    async fn guarded_model_query(
        &self,
        ctx: &RequestContext,
        r: &RefAddress,
        query: &ClientQuery,
    ) -> Result<GuardedAnswer> {
        let model = self.model_graph(ctx, r).await?;
        let iris = self.iris();
        let permission = read_permission(r.kind);
        let guard = permission_pattern(iris, &ctx.subject, permission, chain_terms(iris.ref_chain(r)))
            .and(GraphPattern::exists(model.pointer));
        let metadata = iris.repo_metadata_graph(&r.repo);
        let guarded = query.guard(&model.graph, &guard, &[iris.policies_graph().as_str(), metadata.as_str()])?;

        debug!(subsystem = "engine", op = "query", ref_id = %r.id, form = ?guarded.form, "Guarded query");
        let response = self.store().query(&guarded.sparql, guarded.store_accept()).await?;
        guarded
            .unguard(&response.body)?
            .ok_or_else(|| self.unauthorized(permission, &iris.reference(r)))
    }

    /// Evaluate a client query against the model of `r`.
    pub async fn query_ref(
        &self,
        ctx: &RequestContext,
        r: &RefAddress,
        sparql: &str,
        accept: Option<&str>,
    ) -> Result<StoreResponse> {
        // reject bad syntax and unacceptable types before touching the store
        let query = ClientQuery::parse(sparql)?;
        let format = response_format(query.form(), accept)?;

        match (self.guarded_model_query(ctx, r, &query).await?, format) {
            (GuardedAnswer::Results(body), _) => Ok(StoreResponse {
                content_type: SPARQL_RESULTS_JSON.to_string(),
                body,
            }),
            (GuardedAnswer::Graph(triples), format) => {
                let format = format.unwrap_or(RdfFormat::Turtle);
                Ok(StoreResponse {
                    content_type: format.media_type().to_string(),
                    body: rdf::serialize(&triples, format),
                })
            }
        }
    }

    /// Every triple in the model of `r`.
    pub async fn read_model(&self, ctx: &RequestContext, r: &RefAddress) -> Result<Vec<Triple>> {
        let query = ClientQuery::parse(WHOLE_MODEL)?;
        match self.guarded_model_query(ctx, r, &query).await? {
            GuardedAnswer::Graph(triples) => Ok(triples),
            GuardedAnswer::Results(_) => Err(Error::ServerBug("model read answered with results".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mms_core::RepoAddress;

    use crate::config::EngineConfig;
    use crate::testing::{RecordingScheduler, ScriptedStore};

    const BRANCH: &str = "http://mms.test/orgs/acme/repos/models/branches/master";
    const STAGING: &str = "http://mms.test/orgs/acme/repos/models/graphs/Staging.s1";
    const MARKER_ROW: &str = r#"{"__mms_auth":{"type":"uri","value":"urn:mms:permitted"}}"#;

    fn engine(store: Arc<ScriptedStore>, glomar: bool) -> Engine {
        Engine::new(
            store,
            Arc::new(RecordingScheduler::default()),
            EngineConfig::default()
                .with_root_context("http://mms.test")
                .with_glomar(glomar),
        )
    }

    fn permitted_branch(_: &str) -> String {
        format!(
            "<urn:mms:auth> <urn:mms:authStatus> <urn:mms:permitted> .\n\
             <urn:mms:auth> <urn:mms:exists> <{b}> .\n\
             <{b}> <{commit}> <http://mms.test/orgs/acme/repos/models/commits/c1> .\n\
             <http://mms.test/s/1> <{graph}> <{staging}> .\n",
            b = BRANCH,
            commit = prop::COMMIT,
            graph = prop::GRAPH,
            staging = STAGING,
        )
    }

    fn rows(rows: &str) -> String {
        format!(r#"{{"head":{{"vars":["s","__mms_auth"]}},"results":{{"bindings":[{}]}}}}"#, rows)
    }

    fn master() -> RefAddress {
        RepoAddress::new("acme", "models").branch("master")
    }

    #[tokio::test]
    async fn test_query_carries_its_own_access_check() {
        let store = Arc::new(
            ScriptedStore::new()
                .on_construct(permitted_branch)
                .on_query(|_| rows(&format!(r#"{{"s":{{"type":"uri","value":"urn:a"}}}},{}"#, MARKER_ROW))),
        );
        let engine = engine(store.clone(), true);
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let response = engine
            .query_ref(&ctx, &master(), "SELECT ?s FROM <urn:other> WHERE { ?s ?p ?o }", None)
            .await
            .unwrap();
        assert_eq!(response.content_type, SPARQL_RESULTS_JSON);
        assert!(response.body.contains("urn:a"));
        assert!(!response.body.contains("__mms_auth"));

        let sent = &store.queries()[0];
        assert!(sent.contains(&format!("FROM <{}>", STAGING)));
        assert!(sent.contains(&format!("FROM NAMED <{}>", engine.iris().policies_graph())));
        assert!(sent.contains(&format!("<{}>", prop::SUBJECT)));
        assert!(sent.contains(&format!("<{}> <{}> ?__mms_snap", BRANCH, prop::SNAPSHOT)));
        assert!(!sent.contains("urn:other"));
    }

    #[tokio::test]
    async fn test_missing_marker_is_concealed_under_glomar() {
        let store = Arc::new(
            ScriptedStore::new()
                .on_construct(permitted_branch)
                .on_query(|_| rows("")),
        );
        let engine = engine(store, true);
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let err = engine
            .query_ref(&ctx, &master(), "SELECT ?s WHERE { ?s ?p ?o }", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Concealed(ref msg) if msg.contains(BRANCH)));
    }

    #[tokio::test]
    async fn test_missing_marker_is_forbidden_without_glomar() {
        let store = Arc::new(
            ScriptedStore::new()
                .on_construct(permitted_branch)
                .on_query(|_| "<urn:a> <urn:b> <urn:c> .\n".to_string()),
        );
        let engine = engine(store, false);
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let err = engine
            .query_ref(&ctx, &master(), "CONSTRUCT WHERE { ?s ?p ?o }", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_construct_is_reencoded_for_the_client() {
        let store = Arc::new(ScriptedStore::new().on_construct(permitted_branch).on_query(|_| {
            "<urn:a> <urn:b> <urn:c> .\n<urn:mms:auth> <urn:mms:authStatus> <urn:mms:permitted> .\n".to_string()
        }));
        let engine = engine(store, true);
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let response = engine
            .query_ref(
                &ctx,
                &master(),
                "CONSTRUCT WHERE { ?s ?p ?o }",
                Some("application/n-triples"),
            )
            .await
            .unwrap();
        assert_eq!(response.content_type, "application/n-triples");
        assert_eq!(response.body.trim(), "<urn:a> <urn:b> <urn:c> .");
    }

    #[tokio::test]
    async fn test_syntax_error_costs_no_store_calls() {
        let store = Arc::new(ScriptedStore::new());
        let engine = engine(store.clone(), true);
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let err = engine
            .query_ref(&ctx, &master(), "SELECT WHERE {", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));

        let err = engine
            .query_ref(&ctx, &master(), "ASK { ?s ?p ?o }", Some("text/turtle"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAcceptable(_)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_ref_never_runs_the_query() {
        let store = Arc::new(ScriptedStore::new());
        let engine = engine(store.clone(), true);
        let ctx = RequestContext::new(engine.iris(), "mallory", &[]);
        let err = engine
            .query_ref(&ctx, &master(), "ASK { ?s ?p ?o }", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Concealed(_)));
        assert!(store.queries().is_empty());
    }

    #[tokio::test]
    async fn test_read_model_strips_marker() {
        let store = Arc::new(ScriptedStore::new().on_construct(permitted_branch).on_query(|_| {
            "<urn:a> <urn:b> <urn:c> .\n<urn:mms:auth> <urn:mms:authStatus> <urn:mms:permitted> .\n".to_string()
        }));
        let engine = engine(store.clone(), true);
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let triples = engine.read_model(&ctx, &master()).await.unwrap();
        assert_eq!(triples.len(), 1);
        assert!(store.queries()[0].contains(&format!("FROM <{}>", STAGING)));
    }
}
