//! Named guard conditions for mutating requests.
//!
//! A [`ConditionsGroup`] serves two purposes in one structure:
//!
//! 1. Its conjunction is the WHERE guard of the mutating update, so the
//!    update changes nothing unless every condition holds.
//! 2. Its inspection union yields one failure marker per condition whose
//!    complement holds, so a single follow-up CONSTRUCT explains a no-op
//!    update by naming the condition that failed.

use std::fmt;
use std::sync::Arc;

use mms_core::vocab::marker;
use mms_core::{Error, Result};
use mms_sparql::{tp, GraphPattern, Term, Triple, TriplePattern};

/// Variable bound to the failure marker in inspection branches.
pub const FAILURE_VAR: &str = "__mms_failure";

/// How a failed condition is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Caller lacks a permission; 403, or a concealed 404 under glomar.
    Permission,
    /// Precondition such as If-Match; 412.
    Precondition,
    /// Resource state conflicts with the request; 409.
    Conflict,
    /// Addressed resource does not exist; 404, concealed under glomar.
    NotFound,
    /// Request references something invalid; 400.
    BadRequest,
}

type MessageFn = Arc<dyn Fn() -> String + Send + Sync>;

/// One named guard.
#[derive(Clone)]
pub struct Condition {
    pub name: String,
    pub pattern: GraphPattern,
    pub kind: FailureKind,
    message: MessageFn,
}

impl Condition {
    pub fn new<F>(name: impl Into<String>, pattern: GraphPattern, kind: FailureKind, message: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            pattern,
            kind,
            message: Arc::new(message),
        }
    }

    pub fn message(&self) -> String {
        (self.message)()
    }

    /// IRI bound when this condition's complement holds.
    pub fn failure_marker(&self) -> String {
        format!("{}{}", marker::FAILURE_PREFIX, self.name)
    }

    /// Map this condition's failure to a typed error.
    pub fn to_error(&self, glomar: bool) -> Error {
        let message = self.message();
        match self.kind {
            FailureKind::Permission | FailureKind::NotFound if glomar => Error::Concealed(message),
            FailureKind::Permission => Error::Forbidden(message),
            FailureKind::Precondition => Error::PreconditionFailed {
                condition: self.name.clone(),
                message,
            },
            FailureKind::Conflict => Error::Conflict {
                condition: self.name.clone(),
                message,
            },
            FailureKind::NotFound => Error::NotFound(message),
            FailureKind::BadRequest => Error::InvalidInput(message),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// An ordered, immutable collection of named conditions.
#[derive(Debug, Clone, Default)]
pub struct ConditionsGroup {
    conditions: Vec<Condition>,
}

impl ConditionsGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, condition: Condition) -> Self {
        self.push(condition);
        self
    }

    fn push(&mut self, condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.name == condition.name) {
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }

    /// A new group holding this group's conditions followed by `extra`'s.
    ///
    /// A condition in `extra` replaces one of the same name in place.
    pub fn append(&self, extra: &ConditionsGroup) -> ConditionsGroup {
        let mut out = self.clone();
        for c in &extra.conditions {
            out.push(c.clone());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.conditions.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.name == name)
    }

    /// Conjunction of every condition: the WHERE guard of the update.
    pub fn required_patterns(&self) -> GraphPattern {
        self.conditions
            .iter()
            .fold(GraphPattern::empty(), |acc, c| acc.and(c.pattern.clone()))
    }

    /// Template triple emitted by inspection branches.
    pub fn inspect_template() -> TriplePattern {
        tp(marker::INSPECT, marker::FAILURE, Term::var(FAILURE_VAR))
    }

    /// One UNION branch per condition, binding its failure marker iff the
    /// condition does not hold. Each branch is additionally restricted by
    /// `unless` being absent, so diagnosis is skipped once the write is
    /// known to have succeeded.
    pub fn union_inspect_patterns(&self, unless: &GraphPattern) -> Vec<GraphPattern> {
        self.conditions
            .iter()
            .map(|c| {
                GraphPattern::Group(vec![
                    GraphPattern::not_exists(unless.clone()),
                    GraphPattern::not_exists(c.pattern.clone()),
                    GraphPattern::bind(Term::Iri(c.failure_marker()), FAILURE_VAR),
                ])
            })
            .collect()
    }

    /// Interpret a validation CONSTRUCT result.
    ///
    /// The first flagged condition (in group order) becomes a typed error.
    /// With nothing flagged, the result must contain `success`; otherwise
    /// the failure is unexplained and reported as a server bug.
    pub fn validate(&self, triples: &[Triple], success: &Triple, glomar: bool) -> Result<()> {
        let flagged: Vec<&str> = triples
            .iter()
            .filter(|t| t.subject.as_iri() == Some(marker::INSPECT))
            .filter_map(|t| t.object.as_iri())
            .collect();

        if let Some(failed) = self
            .conditions
            .iter()
            .find(|c| flagged.contains(&c.failure_marker().as_str()))
        {
            return Err(failed.to_error(glomar));
        }

        if !triples.contains(success) {
            return Err(Error::ServerBug(format!(
                "guarded update had no effect and no condition failed (conditions: {})",
                self.names().join(", ")
            )));
        }
        Ok(())
    }
}
