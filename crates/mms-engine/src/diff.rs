//! Graph differences between two commits.
//!
//! A diff is named by a hash of its (destination, source) commit pair, so
//! computing the same pair twice yields the same IRI and graphs, and the
//! second request reuses the first one's result.

use sha2::{Digest, Sha256};
use tracing::info;

use mms_core::vocab::{class, prop};
use mms_core::{validate_id, Error, Permission, RefAddress, RepoAddress, Result};
use mms_sparql::{tp, GraphPattern, GraphTemplate, Term, Triple, TriplePattern, UpdateOperation};

use crate::body::{managed_triples, Description, RdfBody};
use crate::conditions::{ConditionsGroup, FailureKind};
use crate::context::RequestContext;
use crate::engine::Engine;
use crate::guards;
use crate::reads::{GuardedRead, Mutation, Resource};
use crate::refs::{read_permission, validate_ref};
use crate::repos::validate_repo;
use crate::transaction::TransactionPlan;

/// Which half of a diff to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffSide {
    Insertions,
    Deletions,
}

impl DiffSide {
    fn pointer(self) -> &'static str {
        match self {
            DiffSide::Insertions => prop::INS_GRAPH,
            DiffSide::Deletions => prop::DEL_GRAPH,
        }
    }
}

/// Content address of the diff from `src_commit` to `dst_commit`.
pub fn diff_id(src_commit: &str, dst_commit: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dst_commit.as_bytes());
    hasher.update(b"\n");
    hasher.update(src_commit.as_bytes());
    hex::encode(hasher.finalize())
}

/// Operations filling `insertions` with `dst - src` and `deletions` with
/// `src - dst`, when `gate` matches.
pub fn compute_diff(src: &str, dst: &str, insertions: &str, deletions: &str, gate: &GraphPattern) -> Vec<UpdateOperation> {
    vec![
        set_difference(dst, src, insertions, gate),
        set_difference(src, dst, deletions, gate),
    ]
}

/// `INSERT { GRAPH into { t } } WHERE { GRAPH from { t } FILTER NOT EXISTS { GRAPH minus { t } } }`
fn set_difference(from: &str, minus: &str, into: &str, gate: &GraphPattern) -> UpdateOperation {
    let spo = tp(Term::var("__s"), Term::var("__p"), Term::var("__o"));
    UpdateOperation::modify(
        Vec::new(),
        vec![GraphTemplate::new(into, vec![spo.clone()])],
        gate.clone()
            .and(GraphPattern::graph(from, GraphPattern::triples([spo.clone()])))
            .and(GraphPattern::not_exists(GraphPattern::graph(
                minus,
                GraphPattern::triples([spo]),
            ))),
    )
}

impl Engine {
    /// Diff the head of `r` against the source named in `body`
    /// (`mms:srcRef` or `mms:srcCommit`). An existing diff of the same
    /// commit pair is returned as is, with `created == false`.
    pub async fn create_diff(&self, ctx: &RequestContext, r: &RefAddress, body: &RdfBody) -> Result<Mutation> {
        validate_ref(r)?;
        let iris = self.iris();
        let base = iris.reference(r);
        let description = Description::of(&base, body.parse(&base)?, &[prop::SRC_REF, prop::SRC_COMMIT])?;
        let source = self.parse_source(
            &r.repo,
            description.directive(prop::SRC_REF),
            description.directive(prop::SRC_COMMIT),
        )?;

        let (_, dst_state) = self.ref_description(ctx, r, read_permission(r.kind)).await?;
        let resolved = self.resolve_source(&r.repo, &source).await?;
        let src_commit = resolved
            .commit
            .clone()
            .ok_or_else(|| Error::InvalidInput(format!("Diff source {:?} does not exist", source)))?;
        let dst_commit = dst_state.commit;

        let id = diff_id(&src_commit, &dst_commit);
        let iri = iris.diff(&r.repo, &id);
        let metadata = iris.repo_metadata_graph(&r.repo);
        if self.is_typed(&metadata, &iri, class::DIFF).await? {
            return self.existing_diff(ctx, &r.repo, &id).await;
        }

        let src_graph = self.resolve_commit_graph(&r.repo, &src_commit).await?;
        let dst_graph = self.resolve_commit_graph(&r.repo, &dst_commit).await?;
        let insertions = iris.diff_insertions_graph(&r.repo, &id);
        let deletions = iris.diff_deletions_graph(&r.repo, &id);

        let txn = self.begin(ctx, "create_diff");
        let conditions = ConditionsGroup::new()
            .with(self.permitted(ctx, Permission::CREATE_DIFF, iris.ref_chain(r)))
            .with(guards::absent(
                "diffNotExists",
                &metadata,
                &iri,
                class::DIFF,
                FailureKind::Conflict,
                format!("Diff {} already exists", id),
            ));

        let mut triples = managed_triples(&iri, class::DIFF, &id, txn.etag(), txn.timestamp(), ctx.user_iri());
        triples.extend([
            tp(iri.as_str(), prop::SRC_COMMIT, Term::iri(src_commit.as_str())),
            tp(iri.as_str(), prop::DST_COMMIT, Term::iri(dst_commit.as_str())),
            tp(iri.as_str(), prop::SRC_GRAPH, Term::iri(src_graph.as_str())),
            tp(iri.as_str(), prop::DST_GRAPH, Term::iri(dst_graph.as_str())),
            tp(iri.as_str(), prop::INS_GRAPH, Term::iri(insertions.as_str())),
            tp(iri.as_str(), prop::DEL_GRAPH, Term::iri(deletions.as_str())),
        ]);

        let plan = TransactionPlan::new(conditions)
            .insert(metadata.as_str(), triples)
            .then(compute_diff(&src_graph, &dst_graph, &insertions, &deletions, &txn.gate()))
            .fetch(metadata.as_str(), vec![iri.clone()])
            .bulk();

        match self.execute(txn, plan, Vec::new()).await {
            Ok(outcome) => {
                info!(subsystem = "engine", op = "create_diff", diff_id = %id, "Diff computed");
                Ok(Mutation {
                    resource: Resource::new(iri.as_str(), outcome.about(&iri)),
                    transaction_id: outcome.transaction_id,
                    created: true,
                })
            }
            // lost a race with an identical request
            Err(Error::Conflict { condition, .. }) if condition == "diffNotExists" => {
                self.existing_diff(ctx, &r.repo, &id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn existing_diff(&self, ctx: &RequestContext, repo: &RepoAddress, id: &str) -> Result<Mutation> {
        let resource = self.read_diff(ctx, repo, id).await?;
        let transaction_id = resource.etag.clone().unwrap_or_default();
        Ok(Mutation {
            resource,
            transaction_id,
            created: false,
        })
    }

    fn diff_read(&self, repo: &RepoAddress, id: &str, template: Vec<TriplePattern>, data: GraphPattern) -> GuardedRead {
        let iri = self.iris().diff(repo, id);
        let mut chain = self.iris().repo_chain(repo);
        chain.push(iri.clone());
        GuardedRead {
            permission: Permission::READ_DIFF,
            chain,
            exists: guards::typed(&self.iris().repo_metadata_graph(repo), &iri, class::DIFF),
            resource: iri,
            template,
            data,
        }
    }

    pub async fn read_diff(&self, ctx: &RequestContext, repo: &RepoAddress, id: &str) -> Result<Resource> {
        validate_repo(repo)?;
        validate_id("diff", id)?;
        let iri = self.iris().diff(repo, id);
        let own = tp(iri.as_str(), Term::var("p"), Term::var("o"));
        let data = GraphPattern::graph(self.iris().repo_metadata_graph(repo), GraphPattern::triples([own.clone()]));
        let triples = self.read_guarded(ctx, self.diff_read(repo, id, vec![own], data)).await?;
        Ok(Resource::new(iri, triples))
    }

    /// Triples inserted or deleted by a diff.
    pub async fn read_diff_graph(
        &self,
        ctx: &RequestContext,
        repo: &RepoAddress,
        id: &str,
        side: DiffSide,
    ) -> Result<Vec<Triple>> {
        validate_repo(repo)?;
        validate_id("diff", id)?;
        let iri = self.iris().diff(repo, id);
        let spo = tp(Term::var("s"), Term::var("p"), Term::var("o"));
        let data = GraphPattern::graph(
            self.iris().repo_metadata_graph(repo),
            GraphPattern::triples([tp(iri.as_str(), side.pointer(), Term::var("g"))]),
        )
        .and(GraphPattern::graph(Term::var("g"), GraphPattern::triples([spo.clone()])));
        self.read_guarded(ctx, self.diff_read(repo, id, vec![spo], data)).await
    }
}
