//! Branches and locks: what they share.
//!
//! A ref lives in its repo's metadata graph and points at exactly one head
//! commit through `mms:commit`. A branch also points at its Staging
//! snapshot through `mms:snapshot`.

use tracing::info;

use mms_core::defaults::DEFAULT_BRANCH;
use mms_core::vocab::{class, prop, RDF_TYPE};
use mms_core::{validate_id, Error, Permission, RefAddress, RefKind, RepoAddress, Result};
use mms_sparql::{tp, GraphPattern, SelectQuery, Term};

use crate::conditions::{Condition, ConditionsGroup, FailureKind};
use crate::context::RequestContext;
use crate::engine::Engine;
use crate::guards::{self, Preconditions};
use crate::maintenance::MaintenanceTask;
use crate::orgs::scoped_policies;
use crate::reads::{resources_of_class, GuardedRead, Resource};
use crate::repos::validate_repo;
use crate::transaction::TransactionPlan;

/// Current pointers of a ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefState {
    pub iri: String,
    pub commit: String,
    pub etag: Option<String>,
    /// Staging graph, for branches and interim locks.
    pub staging: Option<String>,
}

/// Where a new ref, diff or load takes its content from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Ref(RefAddress),
    /// Commit IRI.
    Commit(String),
}

pub(crate) fn class_of(kind: RefKind) -> &'static str {
    match kind {
        RefKind::Branch => class::BRANCH,
        RefKind::Lock => class::LOCK,
    }
}

pub(crate) fn read_permission(kind: RefKind) -> Permission {
    match kind {
        RefKind::Branch => Permission::READ_BRANCH,
        RefKind::Lock => Permission::READ_LOCK,
    }
}

pub(crate) fn validate_ref(r: &RefAddress) -> Result<()> {
    validate_repo(&r.repo)?;
    validate_id(if r.kind == RefKind::Branch { "branch" } else { "lock" }, &r.id)
}

impl Engine {
    /// Interpret a `mms:ref` / `mms:commit` directive naming a source inside
    /// `repo`. Foreign or malformed IRIs are rejected.
    pub fn parse_source(&self, repo: &RepoAddress, ref_iri: Option<&str>, commit_iri: Option<&str>) -> Result<Source> {
        let repo_iri = self.iris().repo(repo);
        match (ref_iri, commit_iri) {
            (Some(_), Some(_)) => Err(Error::InvalidInput(
                "Specify either mms:ref or mms:commit, not both".into(),
            )),
            (Some(iri), None) => {
                let rest = iri
                    .strip_prefix(repo_iri.as_str())
                    .and_then(|r| r.strip_prefix('/'))
                    .ok_or_else(|| Error::InvalidInput(format!("<{}> is not a ref of {}", iri, repo)))?;
                let source = match rest.split_once('/') {
                    Some(("branches", id)) => repo.branch(id),
                    Some(("locks", id)) => repo.lock(id),
                    _ => return Err(Error::InvalidInput(format!("<{}> is not a ref of {}", iri, repo))),
                };
                validate_ref(&source)?;
                Ok(Source::Ref(source))
            }
            (None, Some(iri)) => {
                let id = iri
                    .strip_prefix(repo_iri.as_str())
                    .and_then(|r| r.strip_prefix("/commits/"))
                    .ok_or_else(|| Error::InvalidInput(format!("<{}> is not a commit of {}", iri, repo)))?;
                validate_id("commit", id)?;
                Ok(Source::Commit(iri.to_string()))
            }
            (None, None) => Err(Error::InvalidInput(
                "Body must name a source with mms:ref or mms:commit".into(),
            )),
        }
    }

    /// Unguarded read of a ref's pointers; `None` when the ref is absent.
    pub(crate) async fn ref_state(&self, r: &RefAddress) -> Result<Option<RefState>> {
        let iri = self.iris().reference(r);
        let metadata = self.iris().repo_metadata_graph(&r.repo);
        let query = SelectQuery::new(
            ["commit", "etag", "staging"],
            GraphPattern::graph(
                metadata.as_str(),
                GraphPattern::triples([
                    tp(iri.as_str(), RDF_TYPE, Term::iri(class_of(r.kind))),
                    tp(iri.as_str(), prop::COMMIT, Term::var("commit")),
                ])
                .and(GraphPattern::optional(GraphPattern::triples([tp(
                    iri.as_str(),
                    prop::ETAG,
                    Term::var("etag"),
                )])))
                .and(GraphPattern::optional(GraphPattern::triples([
                    tp(iri.as_str(), prop::SNAPSHOT, Term::var("snap")),
                    tp(Term::var("snap"), RDF_TYPE, Term::iri(class::STAGING)),
                    tp(Term::var("snap"), prop::GRAPH, Term::var("staging")),
                ]))),
            ),
        )
        .limit(1);
        let solutions = self.select(&query).await?;
        Ok(solutions.first().and_then(|row| {
            row.iri("commit").map(|commit| RefState {
                iri: iri.clone(),
                commit: commit.to_string(),
                etag: row.value("etag").map(String::from),
                staging: row.iri("staging").map(String::from),
            })
        }))
    }

    /// Permission-checked read of a ref's description and pointers.
    pub(crate) async fn ref_description(
        &self,
        ctx: &RequestContext,
        r: &RefAddress,
        permission: Permission,
    ) -> Result<(Resource, RefState)> {
        validate_ref(r)?;
        let iris = self.iris();
        let iri = iris.reference(r);
        let metadata = iris.repo_metadata_graph(&r.repo);
        let own = tp(iri.as_str(), Term::var("p"), Term::var("o"));
        let snapshot_graph = tp(Term::var("snap"), prop::GRAPH, Term::var("g"));

        let triples = self
            .read_guarded(
                ctx,
                GuardedRead {
                    permission,
                    chain: iris.ref_chain(r),
                    resource: iri.clone(),
                    exists: guards::typed(&metadata, &iri, class_of(r.kind)),
                    template: vec![own.clone(), snapshot_graph.clone()],
                    data: GraphPattern::graph(
                        metadata.as_str(),
                        GraphPattern::Union(vec![
                            GraphPattern::triples([own]),
                            GraphPattern::triples([
                                tp(iri.as_str(), prop::SNAPSHOT, Term::var("snap")),
                                tp(Term::var("snap"), RDF_TYPE, Term::iri(class::STAGING)),
                                snapshot_graph,
                            ]),
                        ]),
                    ),
                },
            )
            .await?;

        let (own_triples, snapshot_triples): (Vec<_>, Vec<_>) = triples
            .into_iter()
            .partition(|t| t.subject.as_iri() == Some(iri.as_str()));
        let resource = Resource::new(iri.clone(), own_triples);
        let commit = resource
            .object(prop::COMMIT)
            .and_then(Term::as_iri)
            .map(String::from)
            .ok_or_else(|| Error::ServerBug(format!("Ref {} has no head commit", iri)))?;
        let staging = snapshot_triples
            .iter()
            .find(|t| t.predicate.as_iri() == Some(prop::GRAPH))
            .and_then(|t| t.object.as_iri())
            .map(String::from);
        let state = RefState {
            iri,
            commit,
            etag: resource.etag.clone(),
            staging,
        };
        Ok((resource, state))
    }

    pub async fn read_ref(&self, ctx: &RequestContext, r: &RefAddress) -> Result<Resource> {
        let (resource, _) = self.ref_description(ctx, r, read_permission(r.kind)).await?;
        Ok(resource)
    }

    /// Branches or (non-interim) locks of a repo the caller may read.
    pub async fn list_refs(&self, ctx: &RequestContext, repo: &RepoAddress, kind: RefKind) -> Result<Vec<Resource>> {
        validate_repo(repo)?;
        let iris = self.iris();
        let r = Term::var("ref");
        let all = tp(r.clone(), Term::var("p"), Term::var("o"));
        let mut chain: Vec<Term> = iris.repo_chain(repo).into_iter().map(Term::Iri).collect();
        chain.push(r.clone());

        let triples = self
            .read_listing(
                ctx,
                read_permission(kind),
                chain,
                vec![all.clone()],
                GraphPattern::graph(
                    iris.repo_metadata_graph(repo),
                    GraphPattern::triples([tp(r.clone(), RDF_TYPE, Term::iri(class_of(kind))), all]).and(
                        GraphPattern::not_exists(GraphPattern::triples([tp(
                            r,
                            RDF_TYPE,
                            Term::iri(class::INTERIM_LOCK),
                        )])),
                    ),
                ),
            )
            .await?;
        Ok(resources_of_class(&triples, class_of(kind)))
    }

    /// Delete a branch or lock. Commits and Model snapshots stay; a
    /// branch's Staging graph is dropped during FINALIZE.
    pub async fn delete_ref(&self, ctx: &RequestContext, r: &RefAddress, pre: &Preconditions) -> Result<String> {
        validate_ref(r)?;
        let iris = self.iris();
        let iri = iris.reference(r);
        let metadata = iris.repo_metadata_graph(&r.repo);
        let policies = iris.policies_graph();
        let staging = self.ref_state(r).await?.and_then(|s| s.staging);

        let (permission, op) = match r.kind {
            RefKind::Branch => (Permission::DELETE_BRANCH, "delete_branch"),
            RefKind::Lock => (Permission::DELETE_LOCK, "delete_lock"),
        };
        let txn = self.begin(ctx, op);
        let mut conditions = ConditionsGroup::new()
            .with(self.permitted(ctx, permission, iris.ref_chain(r)))
            .with(guards::exists(
                "refExists",
                &metadata,
                &iri,
                class_of(r.kind),
                FailureKind::NotFound,
                format!("{} not found", r),
            ));
        if r.kind == RefKind::Branch && r.id == DEFAULT_BRANCH {
            conditions = conditions.with(Condition::new(
                "notDefaultBranch",
                GraphPattern::Union(Vec::new()),
                FailureKind::Conflict,
                || format!("The {} branch cannot be deleted", DEFAULT_BRANCH),
            ));
        }
        if let Some(graph) = &staging {
            conditions = conditions.with(guards::staging_unchanged(&metadata, &iri, graph, r.to_string()));
        }
        for c in pre.etag_conditions(&metadata, &iri) {
            conditions = conditions.with(c);
        }

        let own = tp(iri.as_str(), Term::var("__mms_p"), Term::var("__mms_o"));
        let snapshot = tp(Term::var("__mms_snap"), Term::var("__mms_sp"), Term::var("__mms_so"));
        let (policy, scoped) = scoped_policies(&policies, &iri);
        let plan = TransactionPlan::new(conditions)
            .delete(metadata.as_str(), vec![own.clone(), snapshot.clone()])
            .delete(policies.as_str(), vec![policy])
            .bind(GraphPattern::graph(
                metadata.as_str(),
                GraphPattern::triples([own]).and(GraphPattern::optional(GraphPattern::triples([
                    tp(iri.as_str(), prop::SNAPSHOT, Term::var("__mms_snap")),
                    snapshot,
                ]))),
            ))
            .bind(scoped);

        let tasks = staging
            .map(|g| vec![MaintenanceTask::DropGraphs { graphs: vec![g] }])
            .unwrap_or_default();
        let outcome = self.execute(txn, plan, tasks).await?;
        info!(subsystem = "engine", op, ref_id = %r.id, repo_id = %r.repo.repo, "Ref deleted");
        Ok(outcome.transaction_id)
    }

    /// Head commit of `source` and, for a branch, its Staging graph. Also
    /// returns the conditions a write depending on that head must carry.
    pub(crate) async fn resolve_source(&self, repo: &RepoAddress, source: &Source) -> Result<ResolvedSource> {
        let metadata = self.iris().repo_metadata_graph(repo);
        match source {
            Source::Ref(r) => {
                let iri = self.iris().reference(r);
                let state = self.ref_state(r).await?;
                let label = r.to_string();
                let exists = match &state {
                    Some(_) => GraphPattern::exists(guards::typed(&metadata, &iri, class_of(r.kind))),
                    None => GraphPattern::Union(Vec::new()),
                };
                let mut conditions = vec![Condition::new("sourceExists", exists, FailureKind::BadRequest, {
                    let label = label.clone();
                    move || format!("Source {} does not exist", label)
                })];
                if let Some(state) = &state {
                    if let (RefKind::Branch, Some(graph)) = (r.kind, &state.staging) {
                        conditions.push(guards::staging_unchanged(&metadata, &iri, graph, label.clone()));
                    }
                    conditions.push(Condition::new(
                        "sourceHeadUnchanged",
                        GraphPattern::exists(GraphPattern::graph(
                            metadata.as_str(),
                            GraphPattern::triples([tp(iri.as_str(), prop::COMMIT, Term::iri(state.commit.as_str()))]),
                        )),
                        FailureKind::Conflict,
                        move || format!("Source {} moved while the request was processed", label),
                    ));
                }
                Ok(ResolvedSource {
                    commit: state.as_ref().map(|s| s.commit.clone()),
                    staging: match r.kind {
                        RefKind::Branch => state.and_then(|s| s.staging),
                        RefKind::Lock => None,
                    },
                    conditions,
                })
            }
            Source::Commit(iri) => {
                let found = self.is_typed(&metadata, iri, class::COMMIT).await?;
                let exists = if found {
                    GraphPattern::exists(guards::typed(&metadata, iri, class::COMMIT))
                } else {
                    GraphPattern::Union(Vec::new())
                };
                let label = iri.clone();
                Ok(ResolvedSource {
                    commit: found.then(|| iri.clone()),
                    staging: None,
                    conditions: vec![Condition::new("sourceExists", exists, FailureKind::BadRequest, move || {
                        format!("Source commit <{}> does not exist", label)
                    })],
                })
            }
        }
    }

    /// Graph holding the content of `source`'s head: a branch's Staging
    /// graph, otherwise the commit's Model snapshot (rebuilt if needed).
    pub(crate) async fn source_graph(&self, repo: &RepoAddress, resolved: &ResolvedSource) -> Result<Option<String>> {
        if let Some(staging) = &resolved.staging {
            return Ok(Some(staging.clone()));
        }
        match &resolved.commit {
            Some(commit) => Ok(Some(self.resolve_commit_graph(repo, commit).await?)),
            None => Ok(None),
        }
    }
}

/// A source looked up ahead of the transaction that depends on it.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedSource {
    /// `None` when the source does not exist; the `sourceExists` condition
    /// then fails inside the transaction.
    pub commit: Option<String>,
    pub staging: Option<String>,
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::testing::{RecordingScheduler, ScriptedStore};

    fn engine(store: Arc<ScriptedStore>) -> Engine {
        Engine::new(
            store,
            Arc::new(RecordingScheduler::default()),
            EngineConfig::default().with_root_context("http://mms.test"),
        )
    }

    fn repo() -> RepoAddress {
        RepoAddress::new("acme", "models")
    }

    #[test]
    fn test_parse_source_ref_and_commit() {
        let engine = engine(Arc::new(ScriptedStore::new()));
        let source = engine
            .parse_source(&repo(), Some("http://mms.test/orgs/acme/repos/models/locks/v1"), None)
            .unwrap();
        assert_eq!(source, Source::Ref(repo().lock("v1")));

        let commit = "http://mms.test/orgs/acme/repos/models/commits/abc";
        assert_eq!(
            engine.parse_source(&repo(), None, Some(commit)).unwrap(),
            Source::Commit(commit.into())
        );
    }

    #[test]
    fn test_parse_source_rejects_foreign_iris() {
        let engine = engine(Arc::new(ScriptedStore::new()));
        for iri in [
            "http://mms.test/orgs/acme/repos/other/branches/master",
            "http://mms.test/orgs/acme/repos/models/diffs/x",
            "http://mms.test/orgs/acme/repos/models/branches/a/b",
        ] {
            assert!(matches!(
                engine.parse_source(&repo(), Some(iri), None),
                Err(Error::InvalidInput(_))
            ));
        }
        assert!(engine.parse_source(&repo(), None, None).is_err());
    }

    #[tokio::test]
    async fn test_ref_description_splits_pointers() {
        let store = Arc::new(ScriptedStore::new().on_construct(|_| {
            format!(
                "<urn:mms:auth> <urn:mms:authStatus> <urn:mms:permitted> .\n\
                 <urn:mms:auth> <urn:mms:exists> <http://mms.test/orgs/acme/repos/models/branches/master> .\n\
                 <http://mms.test/orgs/acme/repos/models/branches/master> <{commit}> <http://mms.test/c/1> .\n\
                 <http://mms.test/orgs/acme/repos/models/branches/master> <{etag}> \"e1\" .\n\
                 <http://mms.test/s/1> <{graph}> <http://mms.test/g/staging> .\n",
                commit = prop::COMMIT,
                etag = prop::ETAG,
                graph = prop::GRAPH,
            )
        }));
        let engine = engine(store);
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let (resource, state) = engine
            .ref_description(&ctx, &repo().branch("master"), Permission::READ_BRANCH)
            .await
            .unwrap();
        assert_eq!(resource.triples.len(), 2);
        assert_eq!(state.commit, "http://mms.test/c/1");
        assert_eq!(state.etag.as_deref(), Some("e1"));
        assert_eq!(state.staging.as_deref(), Some("http://mms.test/g/staging"));
    }

    #[tokio::test]
    async fn test_default_branch_cannot_be_deleted() {
        let store = Arc::new(ScriptedStore::new().on_construct(|q| {
            if ScriptedStore::is_validation(q) {
                ScriptedStore::validation_failure("notDefaultBranch")
            } else {
                String::new()
            }
        }));
        let engine = engine(store.clone());
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let err = engine
            .delete_ref(&ctx, &repo().branch(DEFAULT_BRANCH), &Preconditions::none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { ref condition, .. } if condition == "notDefaultBranch"));
        assert!(store.updates()[0].contains("FILTER(false)"));
    }

    #[tokio::test]
    async fn test_branch_delete_pins_the_staging_graph_it_drops() {
        let store = Arc::new(
            ScriptedStore::new()
                .on_select(|_| {
                    r#"{"head":{"vars":["commit","etag","staging"]},"results":{"bindings":[{
                        "commit":{"type":"uri","value":"http://mms.test/c/1"},
                        "staging":{"type":"uri","value":"http://mms.test/g/staging"}}]}}"#
                        .to_string()
                })
                .on_construct(|q| {
                    if ScriptedStore::is_validation(q) {
                        ScriptedStore::validation_success(q)
                    } else {
                        String::new()
                    }
                }),
        );
        let scheduler = Arc::new(RecordingScheduler::default());
        let engine = Engine::new(
            store.clone(),
            scheduler.clone(),
            EngineConfig::default().with_root_context("http://mms.test"),
        );
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        engine
            .delete_ref(&ctx, &repo().branch("dev"), &Preconditions::none())
            .await
            .unwrap();

        assert!(store.updates()[0].contains(&format!(
            "?__mms_staging <{}> <http://mms.test/g/staging> .",
            prop::GRAPH
        )));
        assert!(matches!(
            &scheduler.tasks()[0],
            MaintenanceTask::DropGraphs { graphs } if graphs == &vec!["http://mms.test/g/staging".to_string()]
        ));
    }
}
