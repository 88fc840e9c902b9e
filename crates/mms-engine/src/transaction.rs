//! The write protocol: BUILD → ATTEMPT → VALIDATE → FINALIZE.
//!
//! Each phase consumes the previous one's state, so a transaction cannot be
//! validated before it was attempted or finalized twice.
//!
//! ATTEMPT sends one update request. Its first operation is a DELETE/INSERT
//! whose WHERE clause is the conjunction of every condition, and whose
//! INSERT also writes a Transaction node. Any further operations in the
//! request are gated on that node, so they only take effect when the guarded
//! write did. VALIDATE then issues one CONSTRUCT returning either the
//! Transaction node plus the written resource, or one failure marker per
//! condition that does not hold.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use mms_core::vocab::{class, prop, RDF_TYPE};
use mms_core::{new_transaction_id, Error, IriFactory, Result, SparqlStore};
use mms_sparql::rdf::parse_ntriples;
use mms_sparql::{
    tp, ConstructQuery, GraphPattern, GraphTemplate, Term, Triple, TriplePattern, UpdateOperation,
    UpdateRequest,
};

use crate::conditions::ConditionsGroup;
use crate::maintenance::{MaintenanceScheduler, MaintenanceTask};

const TXN_VAR: &str = "__mms_txn";
const FETCH_S: &str = "__mms_s";
const FETCH_P: &str = "__mms_p";
const FETCH_O: &str = "__mms_o";

/// Triples to read back after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetch {
    pub graph: String,
    pub subjects: Vec<String>,
}

/// Everything the ATTEMPT request needs.
#[derive(Debug, Clone, Default)]
pub struct TransactionPlan {
    pub conditions: ConditionsGroup,
    pub delete: Vec<GraphTemplate>,
    pub insert: Vec<GraphTemplate>,
    /// WHERE members that bind template variables without being conditions.
    pub bindings: GraphPattern,
    /// Operations executed after the guarded write in the same request.
    /// They must be gated on [`Transaction::gate`].
    pub follow_ups: Vec<UpdateOperation>,
    pub fetch: Option<Fetch>,
    /// Submit with the store's bulk timeout (graph copies, loads).
    pub bulk: bool,
}

impl TransactionPlan {
    pub fn new(conditions: ConditionsGroup) -> Self {
        Self {
            conditions,
            ..Default::default()
        }
    }

    pub fn delete(mut self, graph: impl Into<String>, triples: Vec<TriplePattern>) -> Self {
        self.delete.push(GraphTemplate::new(Term::Iri(graph.into()), triples));
        self
    }

    pub fn insert(mut self, graph: impl Into<String>, triples: Vec<TriplePattern>) -> Self {
        self.insert.push(GraphTemplate::new(Term::Iri(graph.into()), triples));
        self
    }

    pub fn bind(mut self, pattern: GraphPattern) -> Self {
        self.bindings = self.bindings.and(pattern);
        self
    }

    pub fn then(mut self, ops: impl IntoIterator<Item = UpdateOperation>) -> Self {
        self.follow_ups.extend(ops);
        self
    }

    pub fn bulk(mut self) -> Self {
        self.bulk = true;
        self
    }

    pub fn fetch(mut self, graph: impl Into<String>, subjects: Vec<String>) -> Self {
        self.fetch = Some(Fetch {
            graph: graph.into(),
            subjects,
        });
        self
    }
}

/// Phase marker: transaction minted, nothing sent.
#[derive(Debug)]
pub struct Built;

/// Phase marker: guarded update sent.
#[derive(Debug)]
pub struct Attempted {
    conditions: ConditionsGroup,
    fetch: Option<Fetch>,
}

/// Phase marker: write confirmed.
#[derive(Debug)]
pub struct Validated {
    triples: Vec<Triple>,
}

/// Result handed back to the caller once FINALIZE has been scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub transaction_id: String,
    pub triples: Vec<Triple>,
}

impl TransactionOutcome {
    /// Triples about `subject` only.
    pub fn about(&self, subject: &str) -> Vec<Triple> {
        self.triples
            .iter()
            .filter(|t| t.subject.as_iri() == Some(subject))
            .cloned()
            .collect()
    }
}

/// One mutating request's pass through the write protocol.
pub struct Transaction<S> {
    store: Arc<dyn SparqlStore>,
    iris: IriFactory,
    id: String,
    iri: String,
    user: String,
    op: &'static str,
    created: DateTime<Utc>,
    started: Instant,
    state: S,
}

impl<S> Transaction<S> {
    /// Request-unique transaction id; also the ETag of anything it writes.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn iri(&self) -> &str {
        &self.iri
    }

    pub fn created(&self) -> &DateTime<Utc> {
        &self.created
    }

    /// `xsd:dateTime` literal of the transaction start.
    pub fn timestamp(&self) -> Term {
        Term::date_time(&self.created)
    }

    /// ETag literal written on every resource this transaction touches.
    pub fn etag(&self) -> Term {
        Term::literal(self.id.as_str())
    }

    /// Pattern matching iff this transaction's node exists.
    pub fn gate(&self) -> GraphPattern {
        GraphPattern::graph(
            self.iris.transactions_graph(),
            GraphPattern::triples([tp(self.iri.as_str(), RDF_TYPE, Term::iri(class::TRANSACTION))]),
        )
    }

    fn advance<T>(self, state: T) -> Transaction<T> {
        Transaction {
            store: self.store,
            iris: self.iris,
            id: self.id,
            iri: self.iri,
            user: self.user,
            op: self.op,
            created: self.created,
            started: self.started,
            state,
        }
    }

    fn success_triple(&self) -> Triple {
        Triple::new(self.iri.as_str(), RDF_TYPE, Term::iri(class::TRANSACTION))
    }
}

impl Transaction<Built> {
    /// BUILD: mint a transaction for `op` on behalf of `user`.
    pub fn begin(store: Arc<dyn SparqlStore>, iris: IriFactory, user: &str, op: &'static str) -> Self {
        let id = new_transaction_id();
        let iri = iris.transaction(&id);
        debug!(
            subsystem = "engine",
            component = "transaction",
            op,
            transaction_id = %id,
            "Transaction built"
        );
        Self {
            store,
            iris,
            id,
            iri,
            user: user.to_string(),
            op,
            created: Utc::now(),
            started: Instant::now(),
            state: Built,
        }
    }

    fn node_template(&self) -> GraphTemplate {
        let iri = self.iri.as_str();
        GraphTemplate::new(
            Term::Iri(self.iris.transactions_graph()),
            vec![
                tp(iri, RDF_TYPE, Term::iri(class::TRANSACTION)),
                tp(iri, prop::CREATED, self.timestamp()),
                tp(iri, prop::USER, Term::iri(self.user.as_str())),
            ],
        )
    }

    /// Render the ATTEMPT request for `plan`.
    pub fn render(&self, plan: &TransactionPlan) -> String {
        let mut insert = plan.insert.clone();
        insert.push(self.node_template());
        let primary = UpdateOperation::modify(
            plan.delete.clone(),
            insert,
            plan.conditions.required_patterns().and(plan.bindings.clone()),
        );
        UpdateRequest::new()
            .push(primary)
            .extend(plan.follow_ups.iter().cloned())
            .to_string()
    }

    /// ATTEMPT: submit the guarded update. No retry is performed.
    #[instrument(
        skip(self, plan),
        fields(subsystem = "engine", component = "transaction", op = self.op, transaction_id = %self.id)
    )]
    pub async fn attempt(self, plan: TransactionPlan) -> Result<Transaction<Attempted>> {
        let sparql = self.render(&plan);
        let sent = if plan.bulk {
            self.store.update_bulk(&sparql).await
        } else {
            self.store.update(&sparql).await
        };
        if let Err(e) = sent {
            warn!(error = %e, "Transaction attempt failed, outcome indeterminate");
            return Err(e);
        }
        debug!(conditions = plan.conditions.len(), "Transaction attempted");
        let state = Attempted {
            conditions: plan.conditions,
            fetch: plan.fetch,
        };
        Ok(self.advance(state))
    }
}

impl Transaction<Attempted> {
    /// Render the VALIDATE query.
    pub fn render(&self) -> String {
        let txn_var = Term::var(TXN_VAR);
        let mut template = vec![
            tp(txn_var.clone(), RDF_TYPE, Term::iri(class::TRANSACTION)),
            ConditionsGroup::inspect_template(),
        ];

        let success = GraphPattern::Group(vec![
            GraphPattern::values(TXN_VAR, vec![Term::Iri(self.iri.clone())]),
            GraphPattern::graph(
                self.iris.transactions_graph(),
                GraphPattern::triples([tp(txn_var, RDF_TYPE, Term::iri(class::TRANSACTION))]),
            ),
        ]);
        let mut branches = vec![success];

        if let Some(fetch) = &self.state.fetch {
            let (s, p, o) = (Term::var(FETCH_S), Term::var(FETCH_P), Term::var(FETCH_O));
            template.push(tp(s.clone(), p.clone(), o.clone()));
            branches.push(GraphPattern::Group(vec![
                self.gate(),
                GraphPattern::values(FETCH_S, fetch.subjects.iter().cloned().map(Term::Iri).collect()),
                GraphPattern::graph(fetch.graph.as_str(), GraphPattern::triples([tp(s, p, o)])),
            ]));
        }

        branches.extend(self.state.conditions.union_inspect_patterns(&self.gate()));
        ConstructQuery::new(template, GraphPattern::Union(branches)).to_string()
    }

    /// VALIDATE: confirm the write or name the condition that prevented it.
    #[instrument(
        skip(self),
        fields(subsystem = "engine", component = "transaction", op = self.op, transaction_id = %self.id)
    )]
    pub async fn validate(self, glomar: bool) -> Result<Transaction<Validated>> {
        let body = self.store.construct(&self.render()).await?;
        let triples = parse_ntriples(&body)?;

        if let Err(e) = self
            .state
            .conditions
            .validate(&triples, &self.success_triple(), glomar)
        {
            match &e {
                Error::ServerBug(msg) => {
                    error!(error = %msg, "Transaction failed without a flagged condition")
                }
                other => warn!(
                    condition = other.condition().unwrap_or("permission"),
                    error = %other,
                    "Transaction condition failed"
                ),
            }
            return Err(e);
        }

        let txn_iri = self.iri.clone();
        let written = triples
            .into_iter()
            .filter(|t| {
                let s = t.subject.as_iri();
                s != Some(txn_iri.as_str()) && s != Some(mms_core::vocab::marker::INSPECT)
            })
            .collect();
        debug!("Transaction validated");
        Ok(self.advance(Validated { triples: written }))
    }
}

impl Transaction<Validated> {
    /// FINALIZE: hand `tasks` plus deletion of the Transaction node to the
    /// maintenance scheduler and return the outcome. Maintenance runs after
    /// the caller has responded; its failures are logged, not surfaced.
    pub fn finalize(
        self,
        scheduler: &dyn MaintenanceScheduler,
        tasks: Vec<MaintenanceTask>,
    ) -> TransactionOutcome {
        for task in tasks {
            scheduler.schedule(task);
        }
        scheduler.schedule(MaintenanceTask::DeleteTransaction {
            transaction: self.iri.clone(),
        });
        info!(
            subsystem = "engine",
            component = "transaction",
            op = self.op,
            transaction_id = %self.id,
            duration_ms = self.started.elapsed().as_millis() as u64,
            success = true,
            "Transaction committed"
        );
        TransactionOutcome {
            transaction_id: self.id,
            triples: self.state.triples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{Condition, FailureKind};
    use crate::testing::{RecordingScheduler, ScriptedStore};

    fn iris() -> IriFactory {
        IriFactory::new("http://mms.test")
    }

    fn plan() -> TransactionPlan {
        let conditions = ConditionsGroup::new().with(Condition::new(
            "orgNotExists",
            GraphPattern::not_exists(GraphPattern::Verbatim("<urn:org> ?p ?o .".into())),
            FailureKind::Conflict,
            || "org exists".to_string(),
        ));
        TransactionPlan::new(conditions)
            .insert("urn:g", vec![tp("urn:org", "urn:p", Term::literal("x"))])
            .fetch("urn:g", vec!["urn:org".into()])
    }

    #[test]
    fn test_attempt_request_writes_transaction_node_under_guard() {
        let store = Arc::new(ScriptedStore::new());
        let txn = Transaction::begin(store, iris(), "http://mms.test/users/alice", "create_org");
        let text = txn.render(&plan());
        assert!(text.starts_with("INSERT {"));
        assert!(text.contains(&format!("<{}> <{}> <{}> .", txn.iri(), RDF_TYPE, class::TRANSACTION)));
        assert!(text.contains("<urn:org> <urn:p> \"x\" ."));
        assert!(text.contains("WHERE {\nFILTER NOT EXISTS {\n<urn:org> ?p ?o ."));
    }

    #[test]
    fn test_follow_ups_ride_in_same_request() {
        let store = Arc::new(ScriptedStore::new());
        let txn = Transaction::begin(store, iris(), "u", "commit");
        let gate = txn.gate();
        let plan = plan().then([UpdateOperation::copy_graph_when("urn:a", "urn:b", gate)]);
        let text = txn.render(&plan);
        assert_eq!(text.matches("INSERT {").count(), 2);
        assert!(text.contains(";\n"));
        assert!(text.contains("GRAPH <http://mms.test/graphs/Transactions>"));
    }

    #[test]
    fn test_validate_query_uses_variable_success_template() {
        let store = Arc::new(ScriptedStore::new());
        let txn = Transaction::begin(store, iris(), "u", "create_org").advance(Attempted {
            conditions: plan().conditions,
            fetch: plan().fetch,
        });
        let text = txn.render();
        assert!(text.starts_with("CONSTRUCT {"));
        assert!(text.contains("?__mms_txn <http://www.w3.org/1999/02/22-rdf-syntax-ns#type>"));
        assert!(text.contains(&format!("VALUES ?__mms_txn {{ <{}> }}", txn.iri())));
        assert!(text.contains("VALUES ?__mms_s { <urn:org> }"));
        assert!(text.contains("BIND(<urn:mms:failure:orgNotExists> AS ?__mms_failure)"));
        assert_eq!(text.matches("UNION").count(), 2);
    }

    #[tokio::test]
    async fn test_full_protocol_success() {
        let store = Arc::new(ScriptedStore::new().on_construct(|q| {
            let txn = ScriptedStore::transaction_in(q).unwrap_or_default();
            format!(
                "<{}> <{}> <{}> .\n<urn:org> <urn:p> \"x\" .\n",
                txn, RDF_TYPE, class::TRANSACTION
            )
        }));
        let scheduler = RecordingScheduler::default();
        let txn = Transaction::begin(store.clone(), iris(), "u", "create_org");
        let id = txn.id().to_string();

        let outcome = txn
            .attempt(plan())
            .await
            .unwrap()
            .validate(true)
            .await
            .unwrap()
            .finalize(&scheduler, vec![]);

        assert_eq!(outcome.transaction_id, id);
        assert_eq!(outcome.triples.len(), 1);
        assert_eq!(outcome.about("urn:org").len(), 1);
        assert_eq!(store.updates().len(), 1);
        assert!(matches!(
            scheduler.tasks().as_slice(),
            [MaintenanceTask::DeleteTransaction { .. }]
        ));
    }

    #[tokio::test]
    async fn test_failed_condition_is_named() {
        let store = Arc::new(ScriptedStore::new().on_construct(|_| {
            "<urn:mms:inspect> <urn:mms:failure> <urn:mms:failure:orgNotExists> .\n".to_string()
        }));
        let scheduler = RecordingScheduler::default();
        let err = Transaction::begin(store, iris(), "u", "create_org")
            .attempt(plan())
            .await
            .unwrap()
            .validate(true)
            .await
            .err()
            .unwrap();
        assert_eq!(err.condition(), Some("orgNotExists"));
        assert!(scheduler.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_during_attempt_propagates() {
        let store = Arc::new(ScriptedStore::new().fail_updates(503));
        let err = Transaction::begin(store, iris(), "u", "create_org")
            .attempt(plan())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Store { status: 503, .. }));
    }
}
