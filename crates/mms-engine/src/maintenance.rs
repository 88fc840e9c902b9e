//! Secondary work scheduled by FINALIZE and the janitor.
//!
//! Tasks run after the client has been answered. A failed task leaves the
//! store in a state that reads still handle correctly (a missing Model
//! snapshot is rebuilt on demand, an orphaned Transaction node or interim
//! lock is reaped by the janitor), so failures are logged and dropped.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use mms_core::vocab::{class, prop, RDF_TYPE};
use mms_core::{new_resource_id, RepoAddress, Result};
use mms_sparql::{
    tp, Expr, GraphPattern, GraphTemplate, SelectQuery, Term, UpdateOperation, UpdateRequest,
};

use crate::engine::Engine;

/// A unit of deferred maintenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaintenanceTask {
    /// Remove a finished request's Transaction node.
    DeleteTransaction { transaction: String },
    /// Copy a branch's staging graph into a Model snapshot of `commit`,
    /// provided the branch head is still `commit`.
    MaterializeCommit {
        repo: RepoAddress,
        branch: String,
        commit: String,
        staging_graph: String,
    },
    /// Remove an interim lock together with the graphs it owns.
    DeleteInterimLock { lock: String, metadata_graph: String },
    /// Drop graphs no longer referenced by any resource.
    DropGraphs { graphs: Vec<String> },
}

impl MaintenanceTask {
    pub fn name(&self) -> &'static str {
        match self {
            MaintenanceTask::DeleteTransaction { .. } => "delete_transaction",
            MaintenanceTask::MaterializeCommit { .. } => "materialize_commit",
            MaintenanceTask::DeleteInterimLock { .. } => "delete_interim_lock",
            MaintenanceTask::DropGraphs { .. } => "drop_graphs",
        }
    }
}

/// Accepts FINALIZE work without blocking the request.
pub trait MaintenanceScheduler: Send + Sync {
    fn schedule(&self, task: MaintenanceTask);
}

impl Engine {
    /// Execute one maintenance task against the store.
    #[instrument(skip(self), fields(subsystem = "engine", component = "maintenance", op = task.name()))]
    pub async fn run_maintenance(&self, task: &MaintenanceTask) -> Result<()> {
        let started = Instant::now();
        let request = match task {
            MaintenanceTask::DeleteTransaction { transaction } => {
                delete_subject(&self.iris().transactions_graph(), transaction)
            }
            MaintenanceTask::MaterializeCommit {
                repo,
                branch,
                commit,
                staging_graph,
            } => {
                if !self.config().materialize_commits {
                    debug!("Commit materialization disabled");
                    return Ok(());
                }
                self.materialize_request(repo, branch, commit, staging_graph)
            }
            MaintenanceTask::DeleteInterimLock {
                lock,
                metadata_graph,
            } => self.delete_lock_request(lock, metadata_graph).await?,
            MaintenanceTask::DropGraphs { graphs } => UpdateRequest::new()
                .extend(graphs.iter().map(|g| UpdateOperation::drop_silent(g.as_str()))),
        };
        self.update_bulk(&request).await?;
        debug!(duration_ms = started.elapsed().as_millis() as u64, "Maintenance task done");
        Ok(())
    }

    fn materialize_request(
        &self,
        repo: &RepoAddress,
        branch: &str,
        commit: &str,
        staging_graph: &str,
    ) -> UpdateRequest {
        let snapshot_id = new_resource_id();
        let snapshot = self.iris().snapshot(repo, &snapshot_id);
        let model = self.iris().model_graph(repo, &snapshot_id);
        let metadata = self.iris().repo_metadata_graph(repo);
        let head_is_commit = GraphPattern::graph(
            metadata.as_str(),
            GraphPattern::triples([tp(branch, prop::COMMIT, Term::iri(commit))]),
        );

        let register = UpdateOperation::modify(
            Vec::new(),
            vec![GraphTemplate::new(
                metadata.as_str(),
                vec![
                    tp(snapshot.as_str(), RDF_TYPE, Term::iri(class::MODEL)),
                    tp(snapshot.as_str(), prop::MATERIALIZES, Term::iri(commit)),
                    tp(snapshot.as_str(), prop::GRAPH, Term::Iri(model.clone())),
                ],
            )],
            head_is_commit.clone(),
        );
        UpdateRequest::new()
            .push(register)
            .push(UpdateOperation::copy_graph_when(staging_graph, model, head_is_commit))
    }

    async fn delete_lock_request(&self, lock: &str, metadata_graph: &str) -> Result<UpdateRequest> {
        let query = SelectQuery::new(
            ["g"],
            GraphPattern::graph(
                metadata_graph,
                GraphPattern::Union(vec![
                    GraphPattern::triples([
                        tp(lock, prop::SNAPSHOT, Term::var("snap")),
                        tp(Term::var("snap"), prop::GRAPH, Term::var("g")),
                    ]),
                    GraphPattern::triples([tp(lock, prop::GRAPH, Term::var("g"))]),
                ]),
            ),
        )
        .distinct();
        let graphs: Vec<String> = self
            .select(&query)
            .await?
            .rows
            .iter()
            .filter_map(|row| row.iri("g").map(String::from))
            .collect();

        let (p, o) = (Term::var("p"), Term::var("o"));
        let (snap, sp, so) = (Term::var("snap"), Term::var("sp"), Term::var("so"));
        let delete = UpdateOperation::modify(
            vec![GraphTemplate::new(
                metadata_graph,
                vec![
                    tp(lock, p.clone(), o.clone()),
                    tp(snap.clone(), sp.clone(), so.clone()),
                ],
            )],
            Vec::new(),
            GraphPattern::graph(
                metadata_graph,
                GraphPattern::triples([tp(lock, p, o)]).and(GraphPattern::optional(
                    GraphPattern::triples([
                        tp(lock, prop::SNAPSHOT, snap.clone()),
                        tp(snap, sp, so),
                    ]),
                )),
            ),
        );
        Ok(UpdateRequest::new()
            .push(delete)
            .extend(graphs.iter().map(|g| UpdateOperation::drop_silent(g.as_str()))))
    }

    /// Tasks reaping Transaction nodes and interim locks created before
    /// `cutoff`.
    #[instrument(skip(self), fields(subsystem = "engine", component = "maintenance", op = "sweep"))]
    pub async fn expired_maintenance(&self, cutoff: DateTime<Utc>) -> Result<Vec<MaintenanceTask>> {
        let older = |var: &str| {
            GraphPattern::Filter(Expr::Lt(Term::var(var), Term::date_time(&cutoff)))
        };

        let txns = SelectQuery::new(
            ["txn"],
            GraphPattern::graph(
                self.iris().transactions_graph(),
                GraphPattern::triples([
                    tp(Term::var("txn"), RDF_TYPE, Term::iri(class::TRANSACTION)),
                    tp(Term::var("txn"), prop::CREATED, Term::var("created")),
                ])
                .and(older("created")),
            ),
        )
        .distinct();
        let mut tasks: Vec<MaintenanceTask> = self
            .select(&txns)
            .await?
            .rows
            .iter()
            .filter_map(|row| row.iri("txn"))
            .map(|t| MaintenanceTask::DeleteTransaction {
                transaction: t.to_string(),
            })
            .collect();

        let locks = SelectQuery::new(
            ["lock", "meta"],
            GraphPattern::graph(
                Term::var("meta"),
                GraphPattern::triples([
                    tp(Term::var("lock"), RDF_TYPE, Term::iri(class::INTERIM_LOCK)),
                    tp(Term::var("lock"), prop::CREATED, Term::var("created")),
                ])
                .and(older("created")),
            ),
        )
        .distinct();
        for row in self.select(&locks).await?.rows.iter() {
            if let (Some(lock), Some(meta)) = (row.iri("lock"), row.iri("meta")) {
                tasks.push(MaintenanceTask::DeleteInterimLock {
                    lock: lock.to_string(),
                    metadata_graph: meta.to_string(),
                });
            }
        }

        if !tasks.is_empty() {
            info!(count = tasks.len(), cutoff = %cutoff, "Expired transactions and interim locks found");
        }
        Ok(tasks)
    }
}

/// `DELETE { GRAPH g { s ?p ?o } } WHERE { GRAPH g { s ?p ?o } }`
fn delete_subject(graph: &str, subject: &str) -> UpdateRequest {
    let spo = tp(subject, Term::var("p"), Term::var("o"));
    UpdateRequest::new().push(UpdateOperation::modify(
        vec![GraphTemplate::new(graph, vec![spo.clone()])],
        Vec::new(),
        GraphPattern::graph(graph, GraphPattern::triples([spo])),
    ))
}
