//! Model loads: replace a branch's content with an uploaded model.
//!
//! A load is two transactions around an unguarded diff computation.
//!
//! 1. Stage: an interim lock pins the branch's head, freezes a copy of its
//!    Staging graph and owns a scratch graph receiving the upload.
//! 2. The diff between the frozen copy and the scratch graph is computed
//!    into fresh insertion and deletion graphs.
//! 3. Commit: provided the head has not moved, a new commit pointing at
//!    the diff becomes the head and the diff is applied to Staging.
//!
//! The interim lock is removed afterwards either way; the janitor reaps any
//! that outlive a crashed request.

use tracing::{info, warn};

use mms_core::vocab::{class, prop, RDF_TYPE};
use mms_core::{new_resource_id, Error, Permission, RefAddress, RefKind, Result};
use mms_sparql::{tp, GraphPattern, GraphTemplate, Term, UpdateOperation, UpdateRequest};

use crate::body::{managed_triples, to_pattern, RdfBody};
use crate::commits::{head_binding, ETAG_VAR, HEAD_VAR};
use crate::conditions::{Condition, ConditionsGroup, FailureKind};
use crate::context::RequestContext;
use crate::diff::{compute_diff, diff_id};
use crate::engine::Engine;
use crate::guards::{self, Preconditions};
use crate::maintenance::MaintenanceTask;
use crate::reads::{Mutation, Resource};
use crate::refs::validate_ref;
use crate::snapshots::apply_diff;
use crate::transaction::TransactionPlan;

/// Prefix of interim lock ids.
pub const INTERIM_LOCK_PREFIX: &str = "Interim.";

/// Graphs and nodes created by the staging transaction.
struct Staged {
    lock: String,
    metadata: String,
    frozen: String,
    scratch: String,
}

fn head_is(name: &'static str, metadata: &str, branch: &str, commit: &str, kind: FailureKind, label: String) -> Condition {
    Condition::new(
        name,
        GraphPattern::exists(GraphPattern::graph(
            metadata,
            GraphPattern::triples([tp(branch, prop::COMMIT, Term::iri(commit))]),
        )),
        kind,
        move || format!("Branch {} moved while the model was loading", label),
    )
}

impl Engine {
    /// Replace the content of branch `r` with `body` as one commit.
    pub async fn load_model(
        &self,
        ctx: &RequestContext,
        r: &RefAddress,
        body: &RdfBody,
        pre: &Preconditions,
    ) -> Result<Mutation> {
        validate_ref(r)?;
        if r.kind != RefKind::Branch {
            return Err(Error::InvalidInput(format!("{} is not a branch; locks are read-only", r)));
        }
        let iris = self.iris();
        let branch_iri = iris.reference(r);

        // Upload first so a malformed body costs no store writes.
        let (inline, source_url) = match self.loader() {
            Some(loader) => {
                let url = loader
                    .stash(body.text.clone().into_bytes(), body.format.media_type())
                    .await?;
                (Vec::new(), Some(url))
            }
            None => (body.parse(&branch_iri)?, None),
        };

        let (_, state) = self.ref_description(ctx, r, Permission::UPDATE_BRANCH).await?;
        let staging = state
            .staging
            .ok_or_else(|| Error::ServerBug(format!("Branch {} has no Staging snapshot", r)))?;
        let parent = state.commit;
        let metadata = iris.repo_metadata_graph(&r.repo);

        // stage
        let stage = self.begin(ctx, "load_stage");
        let lock_id = format!("{}{}", INTERIM_LOCK_PREFIX, stage.id());
        let lock = iris.reference(&r.repo.lock(lock_id.as_str()));
        let snapshot_id = new_resource_id();
        let snapshot = iris.snapshot(&r.repo, &snapshot_id);
        let staged = Staged {
            lock: lock.clone(),
            metadata: metadata.clone(),
            frozen: iris.staging_graph(&r.repo, &snapshot_id),
            scratch: iris.scratch_graph(&r.repo, stage.id()),
        };

        let mut conditions = ConditionsGroup::new()
            .with(self.permitted(ctx, Permission::UPDATE_BRANCH, iris.ref_chain(r)))
            .with(head_is(
                "branchHeadIs",
                &metadata,
                &branch_iri,
                &parent,
                FailureKind::Conflict,
                r.to_string(),
            ))
            .with(guards::staging_unchanged(&metadata, &branch_iri, &staging, r.to_string()));
        for c in pre.etag_conditions(&metadata, &branch_iri) {
            conditions = conditions.with(c);
        }

        let mut triples = managed_triples(&lock, class::LOCK, &lock_id, stage.etag(), stage.timestamp(), ctx.user_iri());
        triples.extend([
            tp(lock.as_str(), RDF_TYPE, Term::iri(class::INTERIM_LOCK)),
            tp(lock.as_str(), prop::COMMIT, Term::iri(parent.as_str())),
            tp(lock.as_str(), prop::REF, Term::iri(branch_iri.as_str())),
            tp(lock.as_str(), prop::SNAPSHOT, Term::iri(snapshot.as_str())),
            tp(lock.as_str(), prop::GRAPH, Term::iri(staged.scratch.as_str())),
            tp(snapshot.as_str(), RDF_TYPE, Term::iri(class::STAGING)),
            tp(snapshot.as_str(), prop::GRAPH, Term::iri(staged.frozen.as_str())),
        ]);

        let gate = stage.gate();
        let mut follow_ups = vec![UpdateOperation::copy_graph_when(
            staging.as_str(),
            staged.frozen.as_str(),
            gate.clone(),
        )];
        if !inline.is_empty() {
            follow_ups.push(UpdateOperation::modify(
                Vec::new(),
                vec![GraphTemplate::new(staged.scratch.as_str(), inline.iter().map(to_pattern).collect())],
                gate,
            ));
        }
        let plan = TransactionPlan::new(conditions)
            .insert(metadata.as_str(), triples)
            .then(follow_ups)
            .bulk();
        self.execute(stage, plan, Vec::new()).await?;

        match self
            .commit_load(ctx, r, &branch_iri, &parent, &staging, &staged, source_url)
            .await
        {
            Ok(mutation) => Ok(mutation),
            Err((e, leftovers)) => {
                warn!(
                    subsystem = "engine",
                    op = "load",
                    ref_id = %r.id,
                    error = %e,
                    "Load failed after staging, scheduling cleanup"
                );
                self.schedule(MaintenanceTask::DeleteInterimLock {
                    lock: staged.lock.clone(),
                    metadata_graph: staged.metadata.clone(),
                });
                if !leftovers.is_empty() {
                    self.schedule(MaintenanceTask::DropGraphs { graphs: leftovers });
                }
                Err(e)
            }
        }
    }

    /// Everything after the staging transaction. On failure, returns the
    /// graphs written outside any transaction alongside the error.
    #[allow(clippy::too_many_arguments)]
    async fn commit_load(
        &self,
        ctx: &RequestContext,
        r: &RefAddress,
        branch: &str,
        parent: &str,
        staging: &str,
        staged: &Staged,
        source_url: Option<String>,
    ) -> std::result::Result<Mutation, (Error, Vec<String>)> {
        let iris = self.iris();
        if let Some(url) = source_url {
            let load = UpdateRequest::new().push(UpdateOperation::Load {
                source: Term::iri(url),
                graph: Term::iri(staged.scratch.as_str()),
                silent: false,
            });
            self.update_bulk(&load).await.map_err(|e| (e, Vec::new()))?;
        }

        let txn = self.begin(ctx, "load_commit");
        let commit = iris.commit(&r.repo, txn.id());
        let id = diff_id(parent, &commit);
        let diff = iris.diff(&r.repo, &id);
        let insertions = iris.diff_insertions_graph(&r.repo, &id);
        let deletions = iris.diff_deletions_graph(&r.repo, &id);
        let written = vec![insertions.clone(), deletions.clone()];

        let compute = UpdateRequest::new().extend(compute_diff(
            &staged.frozen,
            &staged.scratch,
            &insertions,
            &deletions,
            &GraphPattern::empty(),
        ));
        self.update_bulk(&compute).await.map_err(|e| (e, written.clone()))?;

        let metadata = staged.metadata.as_str();
        let conditions = ConditionsGroup::new()
            .with(self.permitted(ctx, Permission::UPDATE_BRANCH, iris.ref_chain(r)))
            .with(guards::exists(
                "branchExists",
                metadata,
                branch,
                class::BRANCH,
                FailureKind::NotFound,
                format!("Branch {} not found", r),
            ))
            .with(head_is(
                "branchHeadUnchanged",
                metadata,
                branch,
                parent,
                FailureKind::Conflict,
                r.to_string(),
            ))
            .with(guards::staging_unchanged(metadata, branch, staging, r.to_string()));

        let mut triples = vec![
            tp(branch, prop::COMMIT, Term::iri(commit.as_str())),
            tp(branch, prop::ETAG, txn.etag()),
        ];
        triples.extend(managed_triples(&commit, class::COMMIT, txn.id(), txn.etag(), txn.timestamp(), ctx.user_iri()));
        triples.extend([
            tp(commit.as_str(), prop::PARENT, Term::iri(parent)),
            tp(commit.as_str(), prop::REF, Term::iri(branch)),
            tp(commit.as_str(), prop::DIFF, Term::iri(diff.as_str())),
        ]);
        triples.extend(managed_triples(&diff, class::DIFF, &id, txn.etag(), txn.timestamp(), ctx.user_iri()));
        triples.extend([
            tp(diff.as_str(), prop::SRC_COMMIT, Term::iri(parent)),
            tp(diff.as_str(), prop::DST_COMMIT, Term::iri(commit.as_str())),
            tp(diff.as_str(), prop::INS_GRAPH, Term::iri(insertions.as_str())),
            tp(diff.as_str(), prop::DEL_GRAPH, Term::iri(deletions.as_str())),
        ]);

        let plan = TransactionPlan::new(conditions)
            .delete(
                metadata,
                vec![
                    tp(branch, prop::COMMIT, Term::var(HEAD_VAR)),
                    tp(branch, prop::ETAG, Term::var(ETAG_VAR)),
                ],
            )
            .insert(metadata, triples)
            .bind(head_binding(metadata, branch))
            .then(apply_diff(&deletions, &insertions, staging, &txn.gate()))
            .fetch(metadata, vec![commit.clone()])
            .bulk();

        let tasks = vec![
            MaintenanceTask::DeleteInterimLock {
                lock: staged.lock.clone(),
                metadata_graph: staged.metadata.clone(),
            },
            MaintenanceTask::MaterializeCommit {
                repo: r.repo.clone(),
                branch: branch.to_string(),
                commit: commit.clone(),
                staging_graph: staging.to_string(),
            },
        ];
        let outcome = self.execute(txn, plan, tasks).await.map_err(|e| (e, written))?;
        info!(
            subsystem = "engine",
            op = "load",
            repo_id = %r.repo.repo,
            ref_id = %r.id,
            commit = %commit,
            "Model loaded"
        );
        Ok(Mutation {
            resource: Resource::new(commit.as_str(), outcome.about(&commit)),
            transaction_id: outcome.transaction_id,
            created: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use mms_core::{LoadService, RepoAddress};

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

    /// Validations succeed until `fail_at` (1-based), which reports `condition`.
    fn store(fail_at: Option<(usize, &'static str)>) -> Arc<ScriptedStore> {
        let seen = Arc::new(AtomicUsize::new(0));
        Arc::new(ScriptedStore::new().on_construct(move |q| {
            if !ScriptedStore::is_validation(q) {
                return branch_description();
            }
            let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
            match fail_at {
                Some((at, condition)) if at == n => ScriptedStore::validation_failure(condition),
                _ => ScriptedStore::validation_success(q),
            }
        }))
    }

    fn master() -> RefAddress {
        RepoAddress::new("acme", "models").branch("master")
    }

    #[tokio::test]
    async fn test_load_stages_diffs_then_commits() {
        let store = store(None);
        let scheduler = Arc::new(RecordingScheduler::default());
        let engine = Engine::new(
            store.clone(),
            scheduler.clone(),
            EngineConfig::default().with_root_context("http://mms.test"),
        );
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let m = engine
            .load_model(&ctx, &master(), &RdfBody::turtle("<urn:a> <urn:b> <urn:c> ."), &Preconditions::none())
            .await
            .unwrap();

        let updates = store.updates();
        assert_eq!(updates.len(), 3);
        assert!(updates[0].contains(class::INTERIM_LOCK));
        assert!(updates[0].contains("/graphs/Load."));
        assert!(updates[0].contains("<urn:a> <urn:b> <urn:c> ."));
        assert!(updates[1].contains("FILTER NOT EXISTS"));
        assert!(updates[1].contains(".Ins>"));
        assert!(updates[2].contains(&format!("commits/{}>", m.transaction_id)));
        assert!(updates[2].contains(&format!("<{}> <http://mms.test/orgs/acme/repos/models/commits/c1>", prop::PARENT)));
        assert!(updates[2].contains(&format!("GRAPH <{}>", STAGING)));
        for i in [0, 2] {
            assert!(updates[i].contains(&format!("?__mms_staging <{}> <{}> .", prop::GRAPH, STAGING)));
        }

        let tasks = scheduler.tasks();
        assert!(tasks.iter().any(|t| matches!(t, MaintenanceTask::DeleteInterimLock { .. })));
        assert!(tasks.iter().any(|t| matches!(t, MaintenanceTask::MaterializeCommit { .. })));
    }

    #[tokio::test]
    async fn test_moved_head_cleans_up_interim_state() {
        let store = store(Some((2, "branchHeadUnchanged")));
        let scheduler = Arc::new(RecordingScheduler::default());
        let engine = Engine::new(
            store,
            scheduler.clone(),
            EngineConfig::default().with_root_context("http://mms.test"),
        );
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let err = engine
            .load_model(&ctx, &master(), &RdfBody::turtle("<urn:a> <urn:b> <urn:c> ."), &Preconditions::none())
            .await
            .unwrap_err();
        assert_eq!(err.condition(), Some("branchHeadUnchanged"));

        let tasks = scheduler.tasks();
        assert!(tasks.iter().any(|t| matches!(
            t,
            MaintenanceTask::DeleteInterimLock { lock, .. } if lock.contains("/locks/Interim.")
        )));
        assert!(tasks.iter().any(|t| matches!(
            t,
            MaintenanceTask::DropGraphs { graphs } if graphs.len() == 2
        )));
    }

    struct FixedLoader;

    #[async_trait]
    impl LoadService for FixedLoader {
        async fn stash(&self, _bytes: Vec<u8>, _content_type: &str) -> Result<String> {
            Ok("http://uploads.test/model.ttl".to_string())
        }
    }

    #[tokio::test]
    async fn test_stashed_upload_is_loaded_into_scratch() {
        let store = store(None);
        let engine = Engine::new(
            store.clone(),
            Arc::new(RecordingScheduler::default()),
            EngineConfig::default().with_root_context("http://mms.test"),
        )
        .with_load_service(Arc::new(FixedLoader));
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        engine
            .load_model(&ctx, &master(), &RdfBody::turtle("not parsed here"), &Preconditions::none())
            .await
            .unwrap();

        let updates = store.updates();
        assert!(updates[1].starts_with("LOAD <http://uploads.test/model.ttl> INTO GRAPH <"));
        assert!(updates[1].contains("/graphs/Load."));
    }

    #[tokio::test]
    async fn test_locks_cannot_be_loaded() {
        let engine = Engine::new(
            Arc::new(ScriptedStore::new()),
            Arc::new(RecordingScheduler::default()),
            EngineConfig::default(),
        );
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let lock = RepoAddress::new("acme", "models").lock("v1");
        let err = engine
            .load_model(&ctx, &lock, &RdfBody::turtle(""), &Preconditions::none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
