//! Lock creation. A lock pins one commit; its content is that commit's
//! Model snapshot, resolved when read.

use tracing::info;

use mms_core::vocab::{class, prop};
use mms_core::{Error, Permission, RefAddress, RefKind, Result, ScopeType};
use mms_sparql::{tp, Term};

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
    pub async fn create_lock(
        &self,
        ctx: &RequestContext,
        r: &RefAddress,
        body: &RdfBody,
        pre: &Preconditions,
    ) -> Result<Mutation> {
        validate_ref(r)?;
        if r.kind != RefKind::Lock {
            return Err(Error::InvalidInput(format!("{} is not a lock", r)));
        }
        let iris = self.iris();
        let iri = iris.reference(r);
        let metadata = iris.repo_metadata_graph(&r.repo);
        let cluster = iris.cluster_graph();

        let description = Description::of(&iri, body.parse(&iri)?, &[prop::REF, prop::COMMIT])?;
        let source = self.parse_source(
            &r.repo,
            description.directive(prop::REF),
            description.directive(prop::COMMIT),
        )?;
        let resolved = self.resolve_source(&r.repo, &source).await?;

        let txn = self.begin(ctx, "create_lock");
        let mut conditions = ConditionsGroup::new()
            .with(self.permitted(ctx, Permission::CREATE_LOCK, iris.repo_chain(&r.repo)))
            .with(guards::exists(
                "repoExists",
                &cluster,
                &iris.repo(&r.repo),
                class::REPO,
                FailureKind::NotFound,
                format!("Repo {} not found", r.repo),
            ))
            .with(guards::absent(
                "lockNotExists",
                &metadata,
                &iri,
                class::LOCK,
                if pre.create_only() {
                    FailureKind::Precondition
                } else {
                    FailureKind::Conflict
                },
                format!("Lock {} already exists", r),
            ));
        for c in resolved.conditions {
            conditions = conditions.with(c);
        }

        let commit = resolved.commit.unwrap_or_default();
        let mut triples = managed_triples(&iri, class::LOCK, &r.id, txn.etag(), txn.timestamp(), ctx.user_iri());
        triples.push(tp(iri.as_str(), prop::COMMIT, Term::iri(commit.as_str())));
        triples.extend(description.patterns());

        let plan = TransactionPlan::new(conditions)
            .insert(metadata.as_str(), triples)
            .insert(
                iris.policies_graph(),
                auto_policy(iris, ctx.user_iri(), &iri, ScopeType::Lock),
            )
            .fetch(metadata.as_str(), vec![iri.clone()]);

        let outcome = self.execute(txn, plan, Vec::new()).await?;
        info!(
            subsystem = "engine",
            op = "create_lock",
            repo_id = %r.repo.repo,
            ref_id = %r.id,
            commit = %commit,
            "Lock created"
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
    use crate::testing::{RecordingScheduler, ScriptedStore};

    #[tokio::test]
    async fn test_lock_on_commit_pins_it_without_copying() {
        let commit = "http://mms.test/orgs/acme/repos/models/commits/c7";
        let store = Arc::new(
            ScriptedStore::new()
                .on_select(|_| {
                    r#"{"head":{"vars":["t"]},"results":{"bindings":[{"t":{"type":"uri","value":"x"}}]}}"#.to_string()
                })
                .on_construct(|q| {
                    if ScriptedStore::is_validation(q) {
                        ScriptedStore::validation_success(q)
                    } else {
                        String::new()
                    }
                }),
        );
        let engine = Engine::new(
            store.clone(),
            Arc::new(RecordingScheduler::default()),
            EngineConfig::default().with_root_context("http://mms.test"),
        );
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let lock = RepoAddress::new("acme", "models").lock("v1");
        let body = RdfBody::turtle(format!("<> <{}> <{}> .", prop::COMMIT, commit));
        engine
            .create_lock(&ctx, &lock, &body, &Preconditions::if_none_match("*"))
            .await
            .unwrap();

        let updates = store.updates();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].contains(&format!(
            "<http://mms.test/orgs/acme/repos/models/locks/v1> <{}> <{}> .",
            prop::COMMIT,
            commit
        )));
        assert!(!updates[0].contains("__s"));
        assert!(updates[0].contains("Role.AdminLock"));
    }

    #[tokio::test]
    async fn test_branch_address_rejected() {
        let engine = Engine::new(
            Arc::new(ScriptedStore::new()),
            Arc::new(RecordingScheduler::default()),
            EngineConfig::default(),
        );
        let ctx = RequestContext::new(engine.iris(), "alice", &[]);
        let branch = RepoAddress::new("acme", "models").branch("dev");
        let err = engine
            .create_lock(&ctx, &branch, &RdfBody::turtle(""), &Preconditions::none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
