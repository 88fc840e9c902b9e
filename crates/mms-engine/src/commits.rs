//! Commits: SPARQL updates applied to a branch.
//!
//! A commit is one guarded update request. Its primary operation moves the
//! branch head and records the commit; the patch itself follows in the same
//! request, rewritten against the branch's Staging graph and gated on the
//! transaction node, so the graph only changes when the head moved.

use tracing::info;

use mms_core::vocab::{class, prop};
use mms_core::{validate_id, Error, Permission, RefAddress, RefKind, RepoAddress, Result};
use mms_sparql::{tp, GraphPattern, Patch, Term};

use crate::body::managed_triples;
use crate::conditions::{ConditionsGroup, FailureKind};
use crate::context::RequestContext;
use crate::engine::Engine;
use crate::guards::{self, Preconditions};
use crate::maintenance::MaintenanceTask;
use crate::reads::{GuardedRead, Mutation, Resource};
use crate::repos::validate_repo;
use crate::transaction::TransactionPlan;

pub(crate) const HEAD_VAR: &str = "__mms_head";
pub(crate) const ETAG_VAR: &str = "__mms_etag";

/// Binds the branch's current head and etag.
pub(crate) fn head_binding(metadata: &str, branch: &str) -> GraphPattern {
    GraphPattern::graph(
        metadata,
        GraphPattern::triples([
            tp(branch, prop::COMMIT, Term::var(HEAD_VAR)),
            tp(branch, prop::ETAG, Term::var(ETAG_VAR)),
        ]),
    )
}

impl Engine {
    /// Apply `sparql` to branch `r` as a new commit.
    ///
    /// The commit id is the transaction id, so the commit, the branch's new
    /// etag and the response ETag all agree.
    pub async fn commit_update(
        &self,
        ctx: &RequestContext,
        r: &RefAddress,
        sparql: &str,
        message: Option<&str>,
        pre: &Preconditions,
    ) -> Result<Mutation> {
        if r.kind != RefKind::Branch {
            return Err(Error::InvalidInput(format!("{} is not a branch; locks are read-only", r)));
        }
        let patch = Patch::parse(sparql)?;
        let (_, state) = self.ref_description(ctx, r, Permission::UPDATE_BRANCH).await?;
        let staging = state
            .staging
            .ok_or_else(|| Error::ServerBug(format!("Branch {} has no Staging snapshot", r)))?;

        let iris = self.iris();
        let branch = state.iri;
        let metadata = iris.repo_metadata_graph(&r.repo);
        let txn = self.begin(ctx, "commit");
        let commit = iris.commit(&r.repo, txn.id());

        let mut conditions = ConditionsGroup::new()
            .with(self.permitted(ctx, Permission::UPDATE_BRANCH, iris.ref_chain(r)))
            .with(guards::exists(
                "branchExists",
                &metadata,
                &branch,
                class::BRANCH,
                FailureKind::NotFound,
                format!("Branch {} not found", r),
            ))
            .with(guards::staging_unchanged(&metadata, &branch, &staging, r.to_string()));
        for c in pre.etag_conditions(&metadata, &branch) {
            conditions = conditions.with(c);
        }

        let mut triples = vec![
            tp(branch.as_str(), prop::COMMIT, Term::iri(commit.as_str())),
            tp(branch.as_str(), prop::ETAG, txn.etag()),
        ];
        triples.extend(managed_triples(
            &commit,
            class::COMMIT,
            txn.id(),
            txn.etag(),
            txn.timestamp(),
            ctx.user_iri(),
        ));
        triples.extend([
            tp(commit.as_str(), prop::PARENT, Term::var(HEAD_VAR)),
            tp(commit.as_str(), prop::REF, Term::iri(branch.as_str())),
            tp(commit.as_str(), prop::PATCH, Term::literal(patch.normalized.as_str())),
        ]);
        if let Some(message) = message {
            triples.push(tp(commit.as_str(), prop::MESSAGE, Term::literal(message)));
        }

        let plan = TransactionPlan::new(conditions)
            .delete(
                metadata.as_str(),
                vec![
                    tp(branch.as_str(), prop::COMMIT, Term::var(HEAD_VAR)),
                    tp(branch.as_str(), prop::ETAG, Term::var(ETAG_VAR)),
                ],
            )
            .insert(metadata.as_str(), triples)
            .bind(head_binding(&metadata, &branch))
            .then(patch.apply_to(&staging, &txn.gate()))
            .fetch(metadata.as_str(), vec![commit.clone()]);

        let task = MaintenanceTask::MaterializeCommit {
            repo: r.repo.clone(),
            branch: branch.clone(),
            commit: commit.clone(),
            staging_graph: staging,
        };
        let outcome = self.execute(txn, plan, vec![task]).await?;
        info!(
            subsystem = "engine",
            op = "commit",
            repo_id = %r.repo.repo,
            ref_id = %r.id,
            commit = %commit,
            "Commit applied"
        );
        Ok(Mutation {
            resource: Resource::new(commit.as_str(), outcome.about(&commit)),
            transaction_id: outcome.transaction_id,
            created: true,
        })
    }

    /// Commit metadata; readable by anyone who can read the repo.
    pub async fn read_commit(&self, ctx: &RequestContext, repo: &RepoAddress, commit_id: &str) -> Result<Resource> {
        validate_repo(repo)?;
        validate_id("commit", commit_id)?;
        let iri = self.iris().commit(repo, commit_id);
        let metadata = self.iris().repo_metadata_graph(repo);
        let own = tp(iri.as_str(), Term::var("p"), Term::var("o"));
        let triples = self
            .read_guarded(
                ctx,
                GuardedRead {
                    permission: Permission::READ_REPO,
                    chain: self.iris().repo_chain(repo),
                    resource: iri.clone(),
                    exists: guards::typed(&metadata, &iri, class::COMMIT),
                    template: vec![own.clone()],
                    data: GraphPattern::graph(metadata.as_str(), GraphPattern::triples([own])),
                },
            )
            .await?;
        Ok(Resource::new(iri, triples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::testing::{RecordingScheduler, ScriptedStore};

    const BRANCH: &str = "http://mms.test/orgs/acme/repos/models/branches/master";
    const STAGING: &str = "http://mms.test/orgs/acme/repos/models/graphs/Staging.s1";

    fn branch_description() -> String {
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

    fn engine(store: Arc<ScriptedStore>, scheduler: Arc<RecordingScheduler>) -> Engine {
        Engine::new(
            store,
            scheduler,
            EngineConfig::default().with_root_context("http://mms.test"),
        )
    }

    fn master() -> RefAddress {
        RepoAddress::new("acme", "models").branch("master")
    }

    #[tokio::test]
    async fn test_commit_moves_head_and_patches_staging() {
        let store = Arc::new(ScriptedStore::new().on_construct(|q| {
            if ScriptedStore::is_validation(q) {
                ScriptedStore::validation_success(q)
            } else {
                branch_description()
            }
        }));
        let scheduler = Arc::new(RecordingScheduler::default());
        let engine = engine(store.clone(), scheduler.clone());
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let m = engine
            .commit_update(
                &ctx,
                &master(),
                "INSERT DATA { <urn:a> <urn:b> \"c\" }",
                Some("add a"),
                &Preconditions::none(),
            )
            .await
            .unwrap();

        let update = &store.updates()[0];
        assert!(update.starts_with("DELETE {"));
        assert!(update.contains(&format!("<{}> <{}> ?__mms_head .", BRANCH, prop::COMMIT)));
        assert!(update.contains(&format!("<{}> ?__mms_head .", prop::PARENT)));
        assert!(update.contains(&format!("GRAPH <{}> {{\n<urn:a> <urn:b> \"c\" .", STAGING)));
        assert!(update.contains(&format!("commits/{}>", m.transaction_id)));
        assert!(update.contains(&format!("?__mms_staging <{}> <{}> .", prop::GRAPH, STAGING)));

        let tasks = scheduler.tasks();
        assert!(matches!(
            &tasks[0],
            MaintenanceTask::MaterializeCommit { staging_graph, .. } if staging_graph == STAGING
        ));
    }

    #[tokio::test]
    async fn test_multi_operation_update_rejected_before_any_request() {
        let store = Arc::new(ScriptedStore::new());
        let engine = engine(store.clone(), Arc::new(RecordingScheduler::default()));
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let err = engine
            .commit_update(
                &ctx,
                &master(),
                "INSERT DATA { <urn:a> <urn:b> 1 } ; INSERT DATA { <urn:a> <urn:b> 2 }",
                None,
                &Preconditions::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_etag_reports_named_condition() {
        let store = Arc::new(ScriptedStore::new().on_construct(|q| {
            if ScriptedStore::is_validation(q) {
                ScriptedStore::validation_failure("etagMatches")
            } else {
                branch_description()
            }
        }));
        let engine = engine(store, Arc::new(RecordingScheduler::default()));
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let err = engine
            .commit_update(
                &ctx,
                &master(),
                "DELETE DATA { <urn:a> <urn:b> \"c\" }",
                None,
                &Preconditions::if_match("old"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.condition(), Some("etagMatches"));
    }

    #[tokio::test]
    async fn test_recreated_branch_rejects_commit() {
        let store = Arc::new(ScriptedStore::new().on_construct(|q| {
            if ScriptedStore::is_validation(q) {
                ScriptedStore::validation_failure("stagingUnchanged")
            } else {
                branch_description()
            }
        }));
        let engine = engine(store, Arc::new(RecordingScheduler::default()));
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let err = engine
            .commit_update(
                &ctx,
                &master(),
                "INSERT DATA { <urn:a> <urn:b> \"c\" }",
                None,
                &Preconditions::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { ref condition, .. } if condition == "stagingUnchanged"));
    }
}
