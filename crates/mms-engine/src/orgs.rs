//! Organizations.

use tracing::info;

use mms_core::vocab::{class, prop, RDF_TYPE};
use mms_core::{validate_id, Permission, Result, ScopeType};
use mms_sparql::{tp, Expr, GraphPattern, Term, TriplePattern};

use crate::access::auto_policy;
use crate::body::{managed_triples, Description, RdfBody};
use crate::conditions::{Condition, ConditionsGroup, FailureKind};
use crate::context::RequestContext;
use crate::engine::Engine;
use crate::guards::{self, Preconditions};
use crate::reads::{resources_of_class, GuardedRead, Mutation, Resource};
use crate::transaction::TransactionPlan;

pub(crate) const OLD_P: &str = "__mms_old_p";
pub(crate) const OLD_O: &str = "__mms_old_o";

/// Predicates kept when a resource description is replaced.
pub(crate) const PRESERVED_ON_REPLACE: [&str; 5] = [RDF_TYPE, prop::ID, prop::CREATED, prop::CREATED_BY, prop::ORG];

/// OPTIONAL binding of every replaceable triple of `iri` in `graph`.
pub(crate) fn replaceable(graph: &str, iri: &str) -> (TriplePattern, GraphPattern) {
    let old = tp(iri, Term::var(OLD_P), Term::var(OLD_O));
    let keep = PRESERVED_ON_REPLACE.iter().map(|p| Term::iri(*p)).collect();
    let pattern = GraphPattern::optional(GraphPattern::graph(
        graph,
        GraphPattern::triples([old.clone()])
            .and(GraphPattern::Filter(Expr::In(Term::var(OLD_P), keep).not())),
    ));
    (old, pattern)
}

impl Engine {
    /// Create or replace an org.
    ///
    /// `If-None-Match: *` forces create; `If-Match` forces replace; with
    /// neither, the current state decides.
    pub async fn put_org(
        &self,
        ctx: &RequestContext,
        org_id: &str,
        body: &RdfBody,
        pre: &Preconditions,
    ) -> Result<Mutation> {
        validate_id("org", org_id)?;
        let iri = self.iris().org(org_id);
        let description = Description::of(&iri, body.parse(&iri)?, &[])?;

        let create = if pre.create_only() {
            true
        } else if pre.replace_only() {
            false
        } else {
            !self.is_typed(&self.iris().cluster_graph(), &iri, class::ORG).await?
        };

        if create {
            self.create_org(ctx, org_id, &iri, description, pre).await
        } else {
            self.replace_org(ctx, org_id, &iri, description, pre).await
        }
    }

    async fn create_org(
        &self,
        ctx: &RequestContext,
        org_id: &str,
        iri: &str,
        description: Description,
        pre: &Preconditions,
    ) -> Result<Mutation> {
        let cluster = self.iris().cluster_graph();
        let txn = self.begin(ctx, "create_org");

        let not_exists_kind = if pre.create_only() {
            FailureKind::Precondition
        } else {
            FailureKind::Conflict
        };
        let conditions = ConditionsGroup::new()
            .with(self.permitted(ctx, Permission::CREATE_ORG, vec![self.iris().cluster()]))
            .with(guards::absent(
                "orgNotExists",
                &cluster,
                iri,
                class::ORG,
                not_exists_kind,
                format!("Org {} already exists", org_id),
            ));

        let mut triples = managed_triples(iri, class::ORG, org_id, txn.etag(), txn.timestamp(), ctx.user_iri());
        triples.extend(description.patterns());

        let plan = TransactionPlan::new(conditions)
            .insert(cluster.as_str(), triples)
            .insert(
                self.iris().policies_graph(),
                auto_policy(self.iris(), ctx.user_iri(), iri, ScopeType::Org),
            )
            .fetch(cluster.as_str(), vec![iri.to_string()]);

        let outcome = self.execute(txn, plan, Vec::new()).await?;
        info!(subsystem = "engine", op = "create_org", org_id, "Org created");
        Ok(Mutation {
            resource: Resource::new(iri, outcome.about(iri)),
            transaction_id: outcome.transaction_id,
            created: true,
        })
    }

    async fn replace_org(
        &self,
        ctx: &RequestContext,
        org_id: &str,
        iri: &str,
        description: Description,
        pre: &Preconditions,
    ) -> Result<Mutation> {
        let cluster = self.iris().cluster_graph();
        let txn = self.begin(ctx, "replace_org");

        let mut conditions = ConditionsGroup::new()
            .with(self.permitted(ctx, Permission::UPDATE_ORG, self.iris().org_chain(org_id)))
            .with(guards::exists(
                "orgExists",
                &cluster,
                iri,
                class::ORG,
                FailureKind::NotFound,
                format!("Org {} not found", org_id),
            ));
        for c in pre.etag_conditions(&cluster, iri) {
            conditions = conditions.with(c);
        }

        let (old, bind_old) = replaceable(&cluster, iri);
        let mut triples = vec![tp(iri, prop::ETAG, txn.etag())];
        triples.extend(description.patterns());

        let plan = TransactionPlan::new(conditions)
            .delete(cluster.as_str(), vec![old])
            .insert(cluster.as_str(), triples)
            .bind(bind_old)
            .fetch(cluster.as_str(), vec![iri.to_string()]);

        let outcome = self.execute(txn, plan, Vec::new()).await?;
        info!(subsystem = "engine", op = "replace_org", org_id, "Org replaced");
        Ok(Mutation {
            resource: Resource::new(iri, outcome.about(iri)),
            transaction_id: outcome.transaction_id,
            created: false,
        })
    }

    pub async fn read_org(&self, ctx: &RequestContext, org_id: &str) -> Result<Resource> {
        validate_id("org", org_id)?;
        let iri = self.iris().org(org_id);
        let cluster = self.iris().cluster_graph();
        let own = tp(iri.as_str(), Term::var("p"), Term::var("o"));
        let triples = self
            .read_guarded(
                ctx,
                GuardedRead {
                    permission: Permission::READ_ORG,
                    chain: self.iris().org_chain(org_id),
                    resource: iri.clone(),
                    exists: guards::typed(&cluster, &iri, class::ORG),
                    template: vec![own.clone()],
                    data: GraphPattern::graph(cluster.as_str(), GraphPattern::triples([own])),
                },
            )
            .await?;
        Ok(Resource::new(iri, triples))
    }

    /// Every org the caller may read.
    pub async fn list_orgs(&self, ctx: &RequestContext) -> Result<Vec<Resource>> {
        let org = Term::var("org");
        let all = tp(org.clone(), Term::var("p"), Term::var("o"));
        let triples = self
            .read_listing(
                ctx,
                Permission::READ_ORG,
                vec![Term::iri(self.iris().cluster()), org.clone()],
                vec![all.clone()],
                GraphPattern::graph(
                    self.iris().cluster_graph(),
                    GraphPattern::triples([tp(org, RDF_TYPE, Term::iri(class::ORG)), all]),
                ),
            )
            .await?;
        Ok(resources_of_class(&triples, class::ORG))
    }

    /// Delete an org that owns no repos, along with policies scoped on it.
    pub async fn delete_org(&self, ctx: &RequestContext, org_id: &str, pre: &Preconditions) -> Result<String> {
        validate_id("org", org_id)?;
        let iri = self.iris().org(org_id);
        let cluster = self.iris().cluster_graph();
        let policies = self.iris().policies_graph();
        let txn = self.begin(ctx, "delete_org");

        let mut conditions = ConditionsGroup::new()
            .with(self.permitted(ctx, Permission::DELETE_ORG, self.iris().org_chain(org_id)))
            .with(guards::exists(
                "orgExists",
                &cluster,
                &iri,
                class::ORG,
                FailureKind::NotFound,
                format!("Org {} not found", org_id),
            ));
        for c in pre.etag_conditions(&cluster, &iri) {
            conditions = conditions.with(c);
        }
        let org_name = org_id.to_string();
        conditions = conditions.with(Condition::new(
            "orgHasNoRepos",
            GraphPattern::not_exists(GraphPattern::graph(
                cluster.as_str(),
                GraphPattern::triples([tp(Term::var("__mms_repo"), prop::ORG, Term::iri(iri.as_str()))]),
            )),
            FailureKind::Conflict,
            move || format!("Org {} still has repositories", org_name),
        ));

        let own = tp(iri.as_str(), Term::var("__mms_p"), Term::var("__mms_o"));
        let (policy, scoped) = scoped_policies(&policies, &iri);
        let plan = TransactionPlan::new(conditions)
            .delete(cluster.as_str(), vec![own.clone()])
            .delete(policies.as_str(), vec![policy])
            .bind(GraphPattern::graph(cluster.as_str(), GraphPattern::triples([own])))
            .bind(scoped);

        let outcome = self.execute(txn, plan, Vec::new()).await?;
        info!(subsystem = "engine", op = "delete_org", org_id, "Org deleted");
        Ok(outcome.transaction_id)
    }
}

/// OPTIONAL binding of every triple of policies scoped on `scope` or on
/// anything nested under it, returned with the matching delete template.
pub(crate) fn scoped_policies(policies_graph: &str, scope: &str) -> (TriplePattern, GraphPattern) {
    let policy = Term::var("__mms_pol");
    let scope_var = Term::var("__mms_pol_scope");
    let triple = tp(policy.clone(), Term::var("__mms_pol_p"), Term::var("__mms_pol_o"));
    let pattern = GraphPattern::optional(GraphPattern::graph(
        policies_graph,
        GraphPattern::triples([tp(policy, prop::SCOPE, scope_var.clone()), triple.clone()]).and(
            GraphPattern::Filter(
                Expr::Eq(scope_var.clone(), Term::iri(scope))
                    .or(Expr::StrStarts(scope_var, format!("{}/", scope))),
            ),
        ),
    ));
    (triple, pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mms_core::Error;

    use crate::config::EngineConfig;
    use crate::testing::{RecordingScheduler, ScriptedStore};

    fn engine(store: Arc<ScriptedStore>) -> Engine {
        Engine::new(
            store,
            Arc::new(RecordingScheduler::default()),
            EngineConfig::default().with_root_context("http://mms.test"),
        )
    }

    fn ctx(engine: &Engine) -> RequestContext {
        RequestContext::new(engine.iris(), "alice", &[])
    }

    fn succeeding() -> Arc<ScriptedStore> {
        Arc::new(ScriptedStore::new().on_construct(|q| {
            if ScriptedStore::is_validation(q) {
                let mut out = ScriptedStore::validation_success(q);
                let txn = ScriptedStore::transaction_in(q).unwrap_or_default();
                let id = txn.rsplit('/').next().unwrap_or_default().to_string();
                out.push_str(&format!(
                    "<http://mms.test/orgs/acme> <{}> <{}> .\n<http://mms.test/orgs/acme> <{}> \"{}\" .\n",
                    RDF_TYPE,
                    class::ORG,
                    prop::ETAG,
                    id
                ));
                out
            } else {
                String::new()
            }
        }))
    }

    #[tokio::test]
    async fn test_create_org_writes_resource_policy_and_guard() {
        let store = succeeding();
        let engine = engine(store.clone());
        let body = RdfBody::turtle(r#"<> <http://purl.org/dc/terms/title> "Acme" ."#);
        let m = engine
            .put_org(&ctx(&engine), "acme", &body, &Preconditions::if_none_match("*"))
            .await
            .unwrap();

        assert!(m.created);
        assert_eq!(m.resource.etag.as_deref(), Some(m.transaction_id.as_str()));
        let update = &store.updates()[0];
        assert!(update.contains("<http://mms.test/orgs/acme> <http://purl.org/dc/terms/title> \"Acme\" ."));
        assert!(update.contains(&format!("<{}> \"acme\"", prop::ID)));
        assert!(update.contains("GRAPH <http://mms.test/graphs/AccessControl.Policies>"));
        assert!(update.contains("Role.AdminOrg"));
        assert!(store.selects().is_empty(), "If-None-Match: * skips the existence read");
    }

    #[tokio::test]
    async fn test_stale_if_match_is_precondition_failure() {
        let store = Arc::new(ScriptedStore::new().on_construct(|q| {
            if ScriptedStore::is_validation(q) {
                ScriptedStore::validation_failure("etagMatches")
            } else {
                String::new()
            }
        }));
        let engine = engine(store.clone());
        let err = engine
            .put_org(
                &ctx(&engine),
                "acme",
                &RdfBody::turtle(""),
                &Preconditions::if_match("stale"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed { ref condition, .. } if condition == "etagMatches"));
        let update = &store.updates()[0];
        assert!(update.starts_with("DELETE {"));
        assert!(update.contains("OPTIONAL {"));
    }

    #[tokio::test]
    async fn test_delete_org_with_repos_conflicts() {
        let store = Arc::new(ScriptedStore::new().on_construct(|q| {
            if ScriptedStore::is_validation(q) {
                ScriptedStore::validation_failure("orgHasNoRepos")
            } else {
                String::new()
            }
        }));
        let engine = engine(store);
        let err = engine
            .delete_org(&ctx(&engine), "acme", &Preconditions::none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_invalid_org_id() {
        let engine = engine(succeeding());
        let err = engine
            .put_org(&ctx(&engine), "../x", &RdfBody::turtle(""), &Preconditions::none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_scoped_policies_cover_nested_scopes() {
        let (_, pattern) = scoped_policies("urn:policies", "http://mms.test/orgs/acme");
        let text = pattern.to_string();
        assert!(text.contains("(?__mms_pol_scope = <http://mms.test/orgs/acme>)"));
        assert!(text.contains("STRSTARTS(STR(?__mms_pol_scope), \"http://mms.test/orgs/acme/\")"));
    }

    #[test]
    fn test_replaceable_preserves_managed_identity() {
        let (old, pattern) = replaceable("urn:g", "urn:org");
        assert_eq!(old.predicate, Term::var(OLD_P));
        let text = pattern.to_string();
        assert!(text.contains("(!(?__mms_old_p IN ("));
        assert!(text.contains(prop::CREATED_BY));
    }
}
