//! Repositories.
//!
//! A repo lives in the cluster graph; everything versioned about it (refs,
//! commits, snapshots, diffs) lives in the repo's own metadata graph.

use tracing::info;

use mms_core::defaults::DEFAULT_BRANCH;
use mms_core::vocab::{class, prop, RDF_TYPE};
use mms_core::{new_resource_id, validate_id, Permission, RepoAddress, Result, ScopeType};
use mms_sparql::{tp, GraphPattern, GraphTemplate, SelectQuery, Term, TriplePattern, UpdateOperation};

use crate::access::auto_policy;
use crate::body::{managed_triples, Description, RdfBody};
use crate::conditions::{ConditionsGroup, FailureKind};
use crate::context::RequestContext;
use crate::engine::Engine;
use crate::guards::{self, Preconditions};
use crate::maintenance::MaintenanceTask;
use crate::orgs::{replaceable, scoped_policies};
use crate::reads::{resources_of_class, GuardedRead, Mutation, Resource};
use crate::transaction::TransactionPlan;

pub const INITIAL_COMMIT_MESSAGE: &str = "Initial commit";

pub(crate) fn validate_repo(repo: &RepoAddress) -> Result<()> {
    validate_id("org", &repo.org)?;
    validate_id("repo", &repo.repo)
}

impl Engine {
    /// Create or replace a repo. Creation also writes the default branch,
    /// an empty initial commit and its empty Model and Staging snapshots.
    pub async fn put_repo(
        &self,
        ctx: &RequestContext,
        repo: &RepoAddress,
        body: &RdfBody,
        pre: &Preconditions,
    ) -> Result<Mutation> {
        validate_repo(repo)?;
        let iri = self.iris().repo(repo);
        let description = Description::of(&iri, body.parse(&iri)?, &[])?;

        let create = if pre.create_only() {
            true
        } else if pre.replace_only() {
            false
        } else {
            !self.is_typed(&self.iris().cluster_graph(), &iri, class::REPO).await?
        };

        if create {
            self.create_repo(ctx, repo, &iri, description, pre).await
        } else {
            self.replace_repo(ctx, repo, &iri, description, pre).await
        }
    }

    async fn create_repo(
        &self,
        ctx: &RequestContext,
        repo: &RepoAddress,
        iri: &str,
        description: Description,
        pre: &Preconditions,
    ) -> Result<Mutation> {
        let iris = self.iris();
        let cluster = iris.cluster_graph();
        let metadata = iris.repo_metadata_graph(repo);
        let org_iri = iris.org(&repo.org);
        let txn = self.begin(ctx, "create_repo");

        let conditions = ConditionsGroup::new()
            .with(self.permitted(ctx, Permission::CREATE_REPO, iris.org_chain(&repo.org)))
            .with(guards::exists(
                "orgExists",
                &cluster,
                &org_iri,
                class::ORG,
                FailureKind::NotFound,
                format!("Org {} not found", repo.org),
            ))
            .with(guards::absent(
                "repoNotExists",
                &cluster,
                iri,
                class::REPO,
                if pre.create_only() {
                    FailureKind::Precondition
                } else {
                    FailureKind::Conflict
                },
                format!("Repo {} already exists", repo),
            ));

        let (etag, created, user) = (txn.etag(), txn.timestamp(), ctx.user_iri());
        let mut repo_triples = managed_triples(iri, class::REPO, &repo.repo, etag.clone(), created.clone(), user);
        repo_triples.push(tp(iri, prop::ORG, Term::iri(org_iri.as_str())));
        repo_triples.extend(description.patterns());

        let plan = TransactionPlan::new(conditions)
            .insert(cluster.as_str(), repo_triples)
            .insert(metadata.as_str(), self.initial_history(repo, etag, created, user))
            .insert(
                iris.policies_graph(),
                auto_policy(iris, user, iri, ScopeType::Repo),
            )
            .fetch(cluster.as_str(), vec![iri.to_string()]);

        let outcome = self.execute(txn, plan, Vec::new()).await?;
        info!(
            subsystem = "engine",
            op = "create_repo",
            org_id = %repo.org,
            repo_id = %repo.repo,
            "Repo created"
        );
        Ok(Mutation {
            resource: Resource::new(iri, outcome.about(iri)),
            transaction_id: outcome.transaction_id,
            created: true,
        })
    }

    /// Default branch, root commit and the two empty snapshots.
    fn initial_history(&self, repo: &RepoAddress, etag: Term, created: Term, user: &str) -> Vec<TriplePattern> {
        let iris = self.iris();
        let branch = iris.reference(&repo.branch(DEFAULT_BRANCH));
        let commit_id = new_resource_id();
        let commit = iris.commit(repo, &commit_id);
        let model_id = new_resource_id();
        let model = iris.snapshot(repo, &model_id);
        let staging_id = new_resource_id();
        let staging = iris.snapshot(repo, &staging_id);

        let mut triples = managed_triples(&branch, class::BRANCH, DEFAULT_BRANCH, etag.clone(), created.clone(), user);
        triples.extend([
            tp(branch.as_str(), prop::COMMIT, Term::iri(commit.as_str())),
            tp(branch.as_str(), prop::SNAPSHOT, Term::iri(staging.as_str())),
        ]);
        triples.extend(managed_triples(&commit, class::COMMIT, &commit_id, etag, created, user));
        triples.extend([
            tp(commit.as_str(), prop::MESSAGE, Term::literal(INITIAL_COMMIT_MESSAGE)),
            tp(commit.as_str(), prop::REF, Term::iri(branch.as_str())),
            tp(model.as_str(), RDF_TYPE, Term::iri(class::MODEL)),
            tp(model.as_str(), prop::MATERIALIZES, Term::iri(commit.as_str())),
            tp(model.as_str(), prop::GRAPH, Term::Iri(iris.model_graph(repo, &model_id))),
            tp(staging.as_str(), RDF_TYPE, Term::iri(class::STAGING)),
            tp(staging.as_str(), prop::GRAPH, Term::Iri(iris.staging_graph(repo, &staging_id))),
        ]);
        triples
    }

    async fn replace_repo(
        &self,
        ctx: &RequestContext,
        repo: &RepoAddress,
        iri: &str,
        description: Description,
        pre: &Preconditions,
    ) -> Result<Mutation> {
        let cluster = self.iris().cluster_graph();
        let txn = self.begin(ctx, "replace_repo");

        let mut conditions = ConditionsGroup::new()
            .with(self.permitted(ctx, Permission::UPDATE_REPO, self.iris().repo_chain(repo)))
            .with(guards::exists(
                "repoExists",
                &cluster,
                iri,
                class::REPO,
                FailureKind::NotFound,
                format!("Repo {} not found", repo),
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
        Ok(Mutation {
            resource: Resource::new(iri, outcome.about(iri)),
            transaction_id: outcome.transaction_id,
            created: false,
        })
    }

    pub async fn read_repo(&self, ctx: &RequestContext, repo: &RepoAddress) -> Result<Resource> {
        validate_repo(repo)?;
        let iri = self.iris().repo(repo);
        let cluster = self.iris().cluster_graph();
        let own = tp(iri.as_str(), Term::var("p"), Term::var("o"));
        let triples = self
            .read_guarded(
                ctx,
                GuardedRead {
                    permission: Permission::READ_REPO,
                    chain: self.iris().repo_chain(repo),
                    resource: iri.clone(),
                    exists: guards::typed(&cluster, &iri, class::REPO),
                    template: vec![own.clone()],
                    data: GraphPattern::graph(cluster.as_str(), GraphPattern::triples([own])),
                },
            )
            .await?;
        Ok(Resource::new(iri, triples))
    }

    /// Repos of `org_id` the caller may read.
    pub async fn list_repos(&self, ctx: &RequestContext, org_id: &str) -> Result<Vec<Resource>> {
        validate_id("org", org_id)?;
        let iris = self.iris();
        let org = iris.org(org_id);
        let repo = Term::var("repo");
        let all = tp(repo.clone(), Term::var("p"), Term::var("o"));
        let triples = self
            .read_listing(
                ctx,
                Permission::READ_REPO,
                vec![Term::iri(iris.cluster()), Term::iri(org.as_str()), repo.clone()],
                vec![all.clone()],
                GraphPattern::graph(
                    iris.cluster_graph(),
                    GraphPattern::triples([
                        tp(repo.clone(), RDF_TYPE, Term::iri(class::REPO)),
                        tp(repo, prop::ORG, Term::iri(org.as_str())),
                        all,
                    ]),
                ),
            )
            .await?;
        Ok(resources_of_class(&triples, class::REPO))
    }

    /// Delete a repo, its metadata graph, every graph it references and
    /// every policy scoped inside it.
    pub async fn delete_repo(&self, ctx: &RequestContext, repo: &RepoAddress, pre: &Preconditions) -> Result<String> {
        validate_repo(repo)?;
        let iris = self.iris();
        let iri = iris.repo(repo);
        let cluster = iris.cluster_graph();
        let metadata = iris.repo_metadata_graph(repo);
        let policies = iris.policies_graph();

        let mut graphs = self.graphs_of_repo(&metadata).await?;
        graphs.push(metadata.clone());

        let txn = self.begin(ctx, "delete_repo");
        let mut conditions = ConditionsGroup::new()
            .with(self.permitted(ctx, Permission::DELETE_REPO, iris.repo_chain(repo)))
            .with(guards::exists(
                "repoExists",
                &cluster,
                &iri,
                class::REPO,
                FailureKind::NotFound,
                format!("Repo {} not found", repo),
            ));
        for c in pre.etag_conditions(&cluster, &iri) {
            conditions = conditions.with(c);
        }

        let own = tp(iri.as_str(), Term::var("__mms_p"), Term::var("__mms_o"));
        let (policy, scoped) = scoped_policies(&policies, &iri);
        let spo = tp(Term::var("__s"), Term::var("__p"), Term::var("__o"));
        let clear_metadata = UpdateOperation::modify(
            vec![GraphTemplate::new(metadata.as_str(), vec![spo.clone()])],
            Vec::new(),
            txn.gate()
                .and(GraphPattern::graph(metadata.as_str(), GraphPattern::triples([spo]))),
        );

        let plan = TransactionPlan::new(conditions)
            .delete(cluster.as_str(), vec![own.clone()])
            .delete(policies.as_str(), vec![policy])
            .bind(GraphPattern::graph(cluster.as_str(), GraphPattern::triples([own])))
            .bind(scoped)
            .then([clear_metadata]);

        let outcome = self
            .execute(txn, plan, vec![MaintenanceTask::DropGraphs { graphs }])
            .await?;
        info!(
            subsystem = "engine",
            op = "delete_repo",
            org_id = %repo.org,
            repo_id = %repo.repo,
            "Repo deleted"
        );
        Ok(outcome.transaction_id)
    }

    /// Every graph referenced from a repo's metadata graph.
    async fn graphs_of_repo(&self, metadata: &str) -> Result<Vec<String>> {
        let pointer = Term::var("pointer");
        let query = SelectQuery::new(
            ["g"],
            GraphPattern::graph(
                metadata,
                GraphPattern::triples([tp(Term::var("s"), pointer, Term::var("g"))]),
            )
            .and(GraphPattern::values(
                "pointer",
                vec![
                    Term::iri(prop::GRAPH),
                    Term::iri(prop::INS_GRAPH),
                    Term::iri(prop::DEL_GRAPH),
                ],
            )),
        )
        .distinct();
        let mut graphs: Vec<String> = self
            .select(&query)
            .await?
            .rows
            .iter()
            .filter_map(|row| row.iri("g").map(String::from))
            .collect();
        graphs.sort();
        Ok(graphs)
    }
}
