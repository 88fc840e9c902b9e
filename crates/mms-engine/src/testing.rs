//! Test fixtures for code built on the engine.
//!
//! Always compiled so downstream crates (the API, the jobs worker) can use
//! them in their own tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use mms_core::vocab::{class, RDF_TYPE};
use mms_core::{Error, Result, SparqlStore, StoreResponse};

use crate::maintenance::{MaintenanceScheduler, MaintenanceTask};

static TRANSACTION_IRI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([^<>\s]*/transactions/[^<>\s]+)>").expect("valid transaction regex"));

const EMPTY_RESULTS: &str = r#"{"head":{"vars":[]},"results":{"bindings":[]}}"#;

type Responder = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Kind of a recorded store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Update,
    UpdateBulk,
    Construct,
    Select,
    Query,
}

/// In-memory [`SparqlStore`] answering from closures and recording every call.
pub struct ScriptedStore {
    construct: Responder,
    select: Responder,
    query: Responder,
    update_failure: Option<u16>,
    calls: Mutex<Vec<(CallKind, String)>>,
}

impl Default for ScriptedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedStore {
    /// Updates succeed; CONSTRUCT returns nothing; SELECT returns no rows.
    pub fn new() -> Self {
        Self {
            construct: Arc::new(|_| String::new()),
            select: Arc::new(|_| EMPTY_RESULTS.to_string()),
            query: Arc::new(|_| EMPTY_RESULTS.to_string()),
            update_failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on_construct<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.construct = Arc::new(f);
        self
    }

    pub fn on_select<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.select = Arc::new(f);
        self
    }

    pub fn on_query<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.query = Arc::new(f);
        self
    }

    /// Answer every update with `status`.
    pub fn fail_updates(mut self, status: u16) -> Self {
        self.update_failure = Some(status);
        self
    }

    /// Transaction IRI mentioned in a request, if any.
    pub fn transaction_in(sparql: &str) -> Option<String> {
        TRANSACTION_IRI
            .captures(sparql)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Whether `sparql` is a transaction VALIDATE query.
    pub fn is_validation(sparql: &str) -> bool {
        sparql.contains("?__mms_txn")
    }

    /// N-Triples confirming the transaction named in a VALIDATE query.
    pub fn validation_success(sparql: &str) -> String {
        match Self::transaction_in(sparql) {
            Some(txn) => format!("<{}> <{}> <{}> .\n", txn, RDF_TYPE, class::TRANSACTION),
            None => String::new(),
        }
    }

    /// N-Triples flagging `condition` as failed.
    pub fn validation_failure(condition: &str) -> String {
        format!(
            "<urn:mms:inspect> <urn:mms:failure> <urn:mms:failure:{}> .\n",
            condition
        )
    }

    fn record(&self, kind: CallKind, sparql: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((kind, sparql.to_string()));
        }
    }

    pub fn calls(&self) -> Vec<(CallKind, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn of_kind(&self, kinds: &[CallKind]) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(k, _)| kinds.contains(k))
            .map(|(_, s)| s)
            .collect()
    }

    /// Every update request, bulk or not, in call order.
    pub fn updates(&self) -> Vec<String> {
        self.of_kind(&[CallKind::Update, CallKind::UpdateBulk])
    }

    pub fn constructs(&self) -> Vec<String> {
        self.of_kind(&[CallKind::Construct])
    }

    pub fn selects(&self) -> Vec<String> {
        self.of_kind(&[CallKind::Select])
    }

    pub fn queries(&self) -> Vec<String> {
        self.of_kind(&[CallKind::Query])
    }

    fn check_update(&self) -> Result<()> {
        match self.update_failure {
            Some(status) => Err(Error::Store {
                status,
                body: "scripted failure".into(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SparqlStore for ScriptedStore {
    async fn update(&self, sparql: &str) -> Result<()> {
        self.record(CallKind::Update, sparql);
        self.check_update()
    }

    async fn update_bulk(&self, sparql: &str) -> Result<()> {
        self.record(CallKind::UpdateBulk, sparql);
        self.check_update()
    }

    async fn construct(&self, sparql: &str) -> Result<String> {
        self.record(CallKind::Construct, sparql);
        Ok((self.construct)(sparql))
    }

    async fn select(&self, sparql: &str) -> Result<String> {
        self.record(CallKind::Select, sparql);
        Ok((self.select)(sparql))
    }

    async fn query(&self, sparql: &str, accept: &str) -> Result<StoreResponse> {
        self.record(CallKind::Query, sparql);
        Ok(StoreResponse {
            content_type: accept.to_string(),
            body: (self.query)(sparql),
        })
    }
}

/// Scheduler that keeps tasks for inspection instead of running them.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    tasks: Mutex<Vec<MaintenanceTask>>,
}

impl RecordingScheduler {
    pub fn tasks(&self) -> Vec<MaintenanceTask> {
        self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl MaintenanceScheduler for RecordingScheduler {
    fn schedule(&self, task: MaintenanceTask) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }
}
