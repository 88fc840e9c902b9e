//! Branch creation.

use tracing::info;

use mms_core::vocab::{class, prop, RDF_TYPE};
use mms_core::{new_resource_id, Error, Permission, RefAddress, RefKind, Result, ScopeType};
use mms_sparql::{tp, Term, UpdateOperation};

use crate::access::auto_policy;
use crate::body::{managed_triples, Description, RdfBody};
use crate::conditions::{ConditionsGroup, FailureKind};
use crate::context::RequestContext;
use crate::engine::Engine;
use crate::guards::{self, Preconditions};
use crate::reads::{Mutation, Resource};
use crate::refs::validate_ref;
use crate::transaction::TransactionPlan;

impl Engine {
    /// Create a branch from the head of another ref or from a commit.
    ///
    /// The source's content is copied into two new graphs: the branch's
    /// Staging graph and a Model snapshot of the source commit, so later
    /// commits on the branch never touch the source's graphs.
    pub async fn create_branch(
        &self,
        ctx: &RequestContext,
        r: &RefAddress,
        body: &RdfBody,
        pre: &Preconditions,
    ) -> Result<Mutation> {
        validate_ref(r)?;
        if r.kind != RefKind::Branch {
            return Err(Error::InvalidInput(format!("{} is not a branch", r)));
        }
        let iris = self.iris();
        let iri = iris.reference(r);
        let metadata = iris.repo_metadata_graph(&r.repo);
        let cluster = iris.cluster_graph();
        let repo_iri = iris.repo(&r.repo);

        let description = Description::of(&iri, body.parse(&iri)?, &[prop::REF, prop::COMMIT])?;
        let source = self.parse_source(
            &r.repo,
            description.directive(prop::REF),
            description.directive(prop::COMMIT),
        )?;
        let resolved = self.resolve_source(&r.repo, &source).await?;
        let source_graph = self.source_graph(&r.repo, &resolved).await?;

        let txn = self.begin(ctx, "create_branch");
        let mut conditions = ConditionsGroup::new()
            .with(self.permitted(ctx, Permission::CREATE_BRANCH, iris.repo_chain(&r.repo)))
            .with(guards::exists(
                "repoExists",
                &cluster,
                &repo_iri,
                class::REPO,
                FailureKind::NotFound,
                format!("Repo {} not found", r.repo),
            ))
            .with(guards::absent(
                "branchNotExists",
                &metadata,
                &iri,
                class::BRANCH,
                if pre.create_only() {
                    FailureKind::Precondition
                } else {
                    FailureKind::Conflict
                },
                format!("Branch {} already exists", r),
            ));
        for c in resolved.conditions {
            conditions = conditions.with(c);
        }

        let staging_id = new_resource_id();
        let staging = iris.snapshot(&r.repo, &staging_id);
        let staging_graph = iris.staging_graph(&r.repo, &staging_id);
        let model_id = new_resource_id();
        let model = iris.snapshot(&r.repo, &model_id);
        let model_graph = iris.model_graph(&r.repo, &model_id);
        let commit = resolved.commit.clone().unwrap_or_default();

        let mut triples = managed_triples(&iri, class::BRANCH, &r.id, txn.etag(), txn.timestamp(), ctx.user_iri());
        triples.extend([
            tp(iri.as_str(), prop::COMMIT, Term::iri(commit.as_str())),
            tp(iri.as_str(), prop::SNAPSHOT, Term::iri(staging.as_str())),
            tp(staging.as_str(), RDF_TYPE, Term::iri(class::STAGING)),
            tp(staging.as_str(), prop::GRAPH, Term::iri(staging_graph.as_str())),
            tp(model.as_str(), RDF_TYPE, Term::iri(class::MODEL)),
            tp(model.as_str(), prop::MATERIALIZES, Term::iri(commit.as_str())),
            tp(model.as_str(), prop::GRAPH, Term::iri(model_graph.as_str())),
        ]);
        triples.extend(description.patterns());

        let gate = txn.gate();
        let copies: Vec<UpdateOperation> = source_graph
            .iter()
            .flat_map(|src| {
                [
                    UpdateOperation::copy_graph_when(src.as_str(), staging_graph.as_str(), gate.clone()),
                    UpdateOperation::copy_graph_when(src.as_str(), model_graph.as_str(), gate.clone()),
                ]
            })
            .collect();

        let plan = TransactionPlan::new(conditions)
            .insert(metadata.as_str(), triples)
            .insert(
                iris.policies_graph(),
                auto_policy(iris, ctx.user_iri(), &iri, ScopeType::Branch),
            )
            .then(copies)
            .fetch(metadata.as_str(), vec![iri.clone()])
            .bulk();

        let outcome = self.execute(txn, plan, Vec::new()).await?;
        info!(
            subsystem = "engine",
            op = "create_branch",
            repo_id = %r.repo.repo,
            ref_id = %r.id,
            commit = %commit,
            "Branch created"
        );
        Ok(Mutation {
            resource: Resource::new(iri.as_str(), outcome.about(&iri)),
            transaction_id: outcome.transaction_id,
            created: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mms_core::RepoAddress;

    use crate::config::EngineConfig;
    use crate::testing::{CallKind, RecordingScheduler, ScriptedStore};

    const MASTER_STATE: &str = r#"{"head":{"vars":["commit","etag","staging"]},"results":{"bindings":[
        {"commit":{"type":"uri","value":"http://mms.test/orgs/acme/repos/models/commits/c1"},
         "etag":{"type":"literal","value":"e1"},
         "staging":{"type":"uri","value":"http://mms.test/orgs/acme/repos/models/graphs/Staging.s1"}}
    ]}}"#;

    fn engine(store: Arc<ScriptedStore>) -> Engine {
        Engine::new(
            store,
            Arc::new(RecordingScheduler::default()),
            EngineConfig::default().with_root_context("http://mms.test"),
        )
    }

    fn dev() -> RefAddress {
        RepoAddress::new("acme", "models").branch("dev")
    }

    #[tokio::test]
    async fn test_branch_from_branch_copies_staging_under_gate() {
        let store = Arc::new(
            ScriptedStore::new()
                .on_select(|_| MASTER_STATE.to_string())
                .on_construct(|q| {
                    if ScriptedStore::is_validation(q) {
                        ScriptedStore::validation_success(q)
                    } else {
                        String::new()
                    }
                }),
        );
        let engine = engine(store.clone());
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let body = RdfBody::turtle(format!("<> <{}> <../branches/master> .", prop::REF));
        let m = engine
            .create_branch(&ctx, &dev(), &body, &Preconditions::none())
            .await
            .unwrap();
        assert!(m.created);

        let calls = store.calls();
        let (_, update) = calls.iter().find(|(k, _)| *k == CallKind::UpdateBulk).unwrap();
        assert_eq!(update.matches("GRAPH <http://mms.test/orgs/acme/repos/models/graphs/Staging.s1>").count(), 2);
        assert!(update.contains("<http://mms.test/orgs/acme/repos/models/commits/c1>"));
        assert!(update.contains("Role.AdminBranch"));
        // source head must not move between the read and the write
        assert!(update.contains(&format!(
            "<http://mms.test/orgs/acme/repos/models/branches/master> <{}> <http://mms.test/orgs/acme/repos/models/commits/c1>",
            prop::COMMIT
        )));
    }

    #[tokio::test]
    async fn test_missing_source_is_bad_request() {
        let store = Arc::new(ScriptedStore::new().on_construct(|q| {
            if ScriptedStore::is_validation(q) {
                ScriptedStore::validation_failure("sourceExists")
            } else {
                String::new()
            }
        }));
        let engine = engine(store.clone());
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let body = RdfBody::turtle(format!("<> <{}> <../branches/nope> .", prop::REF));
        let err = engine
            .create_branch(&ctx, &dev(), &body, &Preconditions::none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!store.updates()[0].contains("INSERT {\nGRAPH <http://mms.test/orgs/acme/repos/models/graphs/Staging."));
    }

    #[tokio::test]
    async fn test_branch_body_requires_source() {
        let engine = engine(Arc::new(ScriptedStore::new()));
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let err = engine
            .create_branch(&ctx, &dev(), &RdfBody::turtle(""), &Preconditions::none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
