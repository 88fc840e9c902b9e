//! Permission-checked reads.
//!
//! A guarded read is a single CONSTRUCT whose WHERE is a UNION of a marker
//! branch and a data branch, both carrying the inline permission pattern.
//! The marker branch binds an authorization marker (and an existence marker
//! when the resource exists), so the response alone tells "not permitted"
//! apart from "does not exist".

use mms_core::vocab::{marker, prop};
use mms_core::{Error, Permission, Result};
use mms_sparql::{tp, ConstructQuery, GraphPattern, Term, Triple, TriplePattern};

use crate::access::{chain_terms, permission_pattern};
use crate::context::RequestContext;
use crate::engine::Engine;

const PERMITTED_VAR: &str = "__mms_permitted";
const EXISTS_VAR: &str = "__mms_exists";

/// A read of one addressed resource.
#[derive(Debug, Clone)]
pub struct GuardedRead {
    pub permission: Permission,
    pub chain: Vec<String>,
    pub resource: String,
    /// Matches iff the addressed resource exists.
    pub exists: GraphPattern,
    pub template: Vec<TriplePattern>,
    pub data: GraphPattern,
}

/// An addressed resource's description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub iri: String,
    pub etag: Option<String>,
    pub triples: Vec<Triple>,
}

impl Resource {
    pub fn new(iri: impl Into<String>, triples: Vec<Triple>) -> Self {
        let iri = iri.into();
        let etag = triples
            .iter()
            .find(|t| t.subject.as_iri() == Some(iri.as_str()) && t.predicate.as_iri() == Some(prop::ETAG))
            .map(|t| t.object.value().to_string());
        Self { iri, etag, triples }
    }

    /// First object of `predicate` on the resource itself.
    pub fn object<'a>(&'a self, predicate: &'a str) -> Option<&'a Term> {
        self.objects_of(&self.iri, predicate).next()
    }

    /// Objects of `predicate` on any `subject` in the description.
    pub fn objects_of<'a>(&'a self, subject: &'a str, predicate: &'a str) -> impl Iterator<Item = &'a Term> + 'a {
        self.triples
            .iter()
            .filter(move |t| t.subject.as_iri() == Some(subject) && t.predicate.as_iri() == Some(predicate))
            .map(|t| &t.object)
    }
}

/// Result of a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub resource: Resource,
    pub transaction_id: String,
    /// The resource did not exist before.
    pub created: bool,
}

impl Mutation {
    pub fn etag(&self) -> &str {
        &self.transaction_id
    }
}

impl Engine {
    /// Render the CONSTRUCT for `read`.
    pub(crate) fn guarded_read_query(&self, ctx: &RequestContext, read: &GuardedRead) -> ConstructQuery {
        let perm = permission_pattern(
            self.iris(),
            &ctx.subject,
            read.permission,
            chain_terms(read.chain.clone()),
        );

        let mut template = vec![
            tp(marker::AUTH, marker::AUTH_STATUS, Term::var(PERMITTED_VAR)),
            tp(marker::AUTH, marker::EXISTS, Term::var(EXISTS_VAR)),
        ];
        template.extend(read.template.iter().cloned());

        let marker_branch = GraphPattern::Group(vec![
            perm.clone(),
            GraphPattern::bind(Term::iri(marker::PERMITTED), PERMITTED_VAR),
            GraphPattern::optional(
                read.exists
                    .clone()
                    .and(GraphPattern::bind(Term::Iri(read.resource.clone()), EXISTS_VAR)),
            ),
        ]);
        let data_branch = perm.and(read.data.clone());

        ConstructQuery::new(template, GraphPattern::Union(vec![marker_branch, data_branch]))
    }

    /// Error for a caller lacking `permission` on `resource`.
    pub(crate) fn unauthorized(&self, permission: Permission, resource: &str) -> Error {
        let message = format!("{} on {}", permission, resource);
        if self.config().glomar {
            Error::Concealed(message)
        } else {
            Error::Forbidden(message)
        }
    }

    /// Error for an addressed resource that does not exist.
    pub(crate) fn missing(&self, resource: impl Into<String>) -> Error {
        if self.config().glomar {
            Error::Concealed(resource.into())
        } else {
            Error::NotFound(resource.into())
        }
    }

    /// Execute `read`, mapping an absent authorization marker to 403 and an
    /// absent existence marker to 404. Under glomar both become the same
    /// concealed 404.
    pub async fn read_guarded(&self, ctx: &RequestContext, read: GuardedRead) -> Result<Vec<Triple>> {
        let triples = self.construct(&self.guarded_read_query(ctx, &read)).await?;

        let permitted = triples.iter().any(|t| {
            t.subject.as_iri() == Some(marker::AUTH) && t.predicate.as_iri() == Some(marker::AUTH_STATUS)
        });
        if !permitted {
            return Err(self.unauthorized(read.permission, &read.resource));
        }

        let exists = triples.iter().any(|t| {
            t.subject.as_iri() == Some(marker::AUTH) && t.predicate.as_iri() == Some(marker::EXISTS)
        });
        if !exists {
            return Err(self.missing(read.resource));
        }

        Ok(triples
            .into_iter()
            .filter(|t| t.subject.as_iri() != Some(marker::AUTH))
            .collect())
    }

    /// Read every row of a listing the caller may see. The permission
    /// pattern is evaluated per row against `chain`, which may contain
    /// variables bound by `data`.
    pub(crate) async fn read_listing(
        &self,
        ctx: &RequestContext,
        permission: Permission,
        chain: Vec<Term>,
        template: Vec<TriplePattern>,
        data: GraphPattern,
    ) -> Result<Vec<Triple>> {
        let perm = permission_pattern(self.iris(), &ctx.subject, permission, chain);
        self.construct(&ConstructQuery::new(template, data.and(perm))).await
    }
}

/// Group `triples` into resources by the subjects typed as `class`.
pub fn resources_of_class(triples: &[Triple], class: &str) -> Vec<Resource> {
    let mut iris: Vec<&str> = triples
        .iter()
        .filter(|t| t.predicate.as_iri() == Some(mms_core::vocab::RDF_TYPE) && t.object.as_iri() == Some(class))
        .filter_map(|t| t.subject.as_iri())
        .collect();
    iris.sort_unstable();
    iris.dedup();
    iris.into_iter()
        .map(|iri| {
            let own = triples
                .iter()
                .filter(|t| t.subject.as_iri() == Some(iri))
                .cloned()
                .collect();
            Resource::new(iri, own)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mms_core::vocab::class;

    use crate::config::EngineConfig;
    use crate::testing::{RecordingScheduler, ScriptedStore};

    fn engine(store: ScriptedStore, glomar: bool) -> Engine {
        Engine::new(
            Arc::new(store),
            Arc::new(RecordingScheduler::default()),
            EngineConfig::default()
                .with_root_context("http://mms.test")
                .with_glomar(glomar),
        )
    }

    fn ctx(engine: &Engine) -> RequestContext {
        RequestContext::new(engine.iris(), "alice", &[])
    }

    fn read(engine: &Engine) -> GuardedRead {
        let org = engine.iris().org("acme");
        let graph = engine.iris().cluster_graph();
        GuardedRead {
            permission: Permission::READ_ORG,
            chain: engine.iris().org_chain("acme"),
            resource: org.clone(),
            exists: crate::guards::typed(&graph, &org, class::ORG),
            template: vec![tp(org.as_str(), Term::var("p"), Term::var("o"))],
            data: GraphPattern::graph(
                graph.as_str(),
                GraphPattern::triples([tp(org.as_str(), Term::var("p"), Term::var("o"))]),
            ),
        }
    }

    #[test]
    fn test_query_shape() {
        let engine = engine(ScriptedStore::new(), true);
        let text = engine.guarded_read_query(&ctx(&engine), &read(&engine)).to_string();
        assert!(text.contains("<urn:mms:auth> <urn:mms:authStatus> ?__mms_permitted ."));
        assert!(text.contains("BIND(<urn:mms:permitted> AS ?__mms_permitted)"));
        assert!(text.contains("BIND(<http://mms.test/orgs/acme> AS ?__mms_exists)"));
        assert_eq!(text.matches("UNION").count(), 1);
        assert_eq!(text.matches("FILTER EXISTS").count(), 2);
    }

    #[tokio::test]
    async fn test_missing_auth_marker_is_hidden_under_glomar() {
        let store = ScriptedStore::new().on_construct(|_| String::new());
        let engine = engine(store, true);
        let err = engine.read_guarded(&ctx(&engine), read(&engine)).await.unwrap_err();
        assert!(matches!(err, Error::Concealed(_)));
    }

    #[tokio::test]
    async fn test_glomar_absent_and_unauthorized_look_alike() {
        let unauthorized = engine(ScriptedStore::new(), true);
        let absent = engine(
            ScriptedStore::new().on_construct(|_| {
                "<urn:mms:auth> <urn:mms:authStatus> <urn:mms:permitted> .\n".to_string()
            }),
            true,
        );
        let a = unauthorized
            .read_guarded(&ctx(&unauthorized), read(&unauthorized))
            .await
            .unwrap_err();
        let b = absent.read_guarded(&ctx(&absent), read(&absent)).await.unwrap_err();
        assert!(matches!(a, Error::Concealed(_)));
        assert!(matches!(b, Error::Concealed(_)));
    }

    #[tokio::test]
    async fn test_missing_auth_marker_is_forbidden_without_glomar() {
        let store = ScriptedStore::new().on_construct(|_| String::new());
        let engine = engine(store, false);
        let err = engine.read_guarded(&ctx(&engine), read(&engine)).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_permitted_but_absent_is_not_found() {
        let store = ScriptedStore::new().on_construct(|_| {
            "<urn:mms:auth> <urn:mms:authStatus> <urn:mms:permitted> .\n".to_string()
        });
        let engine = engine(store, false);
        let err = engine.read_guarded(&ctx(&engine), read(&engine)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_markers_are_stripped_from_result() {
        let store = ScriptedStore::new().on_construct(|_| {
            concat!(
                "<urn:mms:auth> <urn:mms:authStatus> <urn:mms:permitted> .\n",
                "<urn:mms:auth> <urn:mms:exists> <http://mms.test/orgs/acme> .\n",
                "<http://mms.test/orgs/acme> <https://mms.openmbee.org/rdf/ontology/etag> \"t1\" .\n",
            )
            .to_string()
        });
        let engine = engine(store, true);
        let triples = engine.read_guarded(&ctx(&engine), read(&engine)).await.unwrap();
        assert_eq!(triples.len(), 1);
        let resource = Resource::new(engine.iris().org("acme"), triples);
        assert_eq!(resource.etag.as_deref(), Some("t1"));
    }

    #[test]
    fn test_resources_of_class_groups_by_subject() {
        let triples = vec![
            Triple::new("urn:b", mms_core::vocab::RDF_TYPE, Term::iri(class::ORG)),
            Triple::new("urn:a", mms_core::vocab::RDF_TYPE, Term::iri(class::ORG)),
            Triple::new("urn:a", prop::ID, Term::literal("a")),
        ];
        let resources = resources_of_class(&triples, class::ORG);
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].iri, "urn:a");
        assert_eq!(resources[0].triples.len(), 2);
    }
}
