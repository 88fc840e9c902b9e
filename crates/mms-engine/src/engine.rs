//! The engine handle shared by every request.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use mms_core::defaults::STORE_SLOW_MS;
use mms_core::vocab::RDF_TYPE;
use mms_core::{IriFactory, LoadService, Permission, Result, SparqlStore};
use mms_sparql::rdf::parse_ntriples;
use mms_sparql::{
    tp, ConstructQuery, GraphPattern, SelectQuery, Solutions, Term, Triple, UpdateRequest,
};

use crate::access::{chain_terms, permission_pattern};
use crate::conditions::{Condition, FailureKind};
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::maintenance::{MaintenanceScheduler, MaintenanceTask};
use crate::transaction::{Built, Transaction, TransactionOutcome, TransactionPlan};

/// Version-control engine over an injected SPARQL store.
///
/// Cheap to share behind an `Arc`; holds no per-request state.
pub struct Engine {
    store: Arc<dyn SparqlStore>,
    loader: Option<Arc<dyn LoadService>>,
    scheduler: Arc<dyn MaintenanceScheduler>,
    iris: IriFactory,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        store: Arc<dyn SparqlStore>,
        scheduler: Arc<dyn MaintenanceScheduler>,
        config: EngineConfig,
    ) -> Self {
        let iris = IriFactory::new(&config.root_context);
        Self {
            store,
            loader: None,
            scheduler,
            iris,
            config,
        }
    }

    /// Use `loader` to stage uploaded models instead of inlining them.
    pub fn with_load_service(mut self, loader: Arc<dyn LoadService>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn iris(&self) -> &IriFactory {
        &self.iris
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SparqlStore> {
        &self.store
    }

    pub(crate) fn loader(&self) -> Option<&Arc<dyn LoadService>> {
        self.loader.as_ref()
    }

    pub(crate) fn begin(&self, ctx: &RequestContext, op: &'static str) -> Transaction<Built> {
        Transaction::begin(self.store.clone(), self.iris.clone(), ctx.user_iri(), op)
    }

    /// Run ATTEMPT, VALIDATE and FINALIZE for a built transaction.
    pub(crate) async fn execute(
        &self,
        txn: Transaction<Built>,
        plan: TransactionPlan,
        tasks: Vec<MaintenanceTask>,
    ) -> Result<TransactionOutcome> {
        let validated = txn.attempt(plan).await?.validate(self.config.glomar).await?;
        Ok(validated.finalize(self.scheduler.as_ref(), tasks))
    }

    pub(crate) fn schedule(&self, task: MaintenanceTask) {
        self.scheduler.schedule(task);
    }

    /// Condition holding iff the caller has `required` somewhere on `chain`.
    pub(crate) fn permitted(
        &self,
        ctx: &RequestContext,
        required: Permission,
        chain: Vec<String>,
    ) -> Condition {
        let user = ctx.user_id.clone();
        let target = chain.last().cloned().unwrap_or_default();
        Condition::new(
            "permitted",
            permission_pattern(&self.iris, &ctx.subject, required, chain_terms(chain)),
            FailureKind::Permission,
            move || format!("User {} is not permitted to {} on {}", user, required, target),
        )
    }

    pub(crate) async fn select(&self, query: &SelectQuery) -> Result<Solutions> {
        let started = Instant::now();
        let body = self.store.select(&query.to_string()).await?;
        log_read("select", started);
        Solutions::parse(&body)
    }

    pub(crate) async fn construct(&self, query: &ConstructQuery) -> Result<Vec<Triple>> {
        let started = Instant::now();
        let body = self.store.construct(&query.to_string()).await?;
        log_read("construct", started);
        parse_ntriples(&body)
    }

    /// Unguarded existence check, used only to pick between create and
    /// replace; the transaction re-checks under its own conditions.
    pub(crate) async fn is_typed(&self, graph: &str, iri: &str, class: &str) -> Result<bool> {
        let query = SelectQuery::new(
            ["t"],
            GraphPattern::graph(
                graph,
                GraphPattern::triples([tp(iri, RDF_TYPE, Term::var("t"))]),
            )
            .and(GraphPattern::values("t", vec![Term::iri(class)])),
        )
        .limit(1);
        Ok(!self.select(&query).await?.is_empty())
    }

    pub(crate) async fn update_bulk(&self, request: &UpdateRequest) -> Result<()> {
        if request.is_empty() {
            return Ok(());
        }
        self.store.update_bulk(&request.to_string()).await
    }
}

fn log_read(op: &'static str, started: Instant) {
    let duration_ms = started.elapsed().as_millis() as u64;
    if duration_ms > STORE_SLOW_MS {
        warn!(subsystem = "engine", op, duration_ms, slow = true, "Slow engine read");
    } else {
        debug!(subsystem = "engine", op, duration_ms, "Engine read");
    }
}
