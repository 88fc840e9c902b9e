//! Reusable conditions shared by the resource endpoints.

use mms_core::vocab::{class, prop, RDF_TYPE};
use mms_sparql::{tp, Expr, GraphPattern, Term};

use crate::conditions::{Condition, FailureKind};

const CURRENT_ETAG: &str = "__mms_current_etag";

/// Client-supplied `If-Match` / `If-None-Match` values, unquoted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub if_match: Vec<String>,
    pub if_none_match: Vec<String>,
}

impl Preconditions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn if_match(etag: impl Into<String>) -> Self {
        Self {
            if_match: vec![etag.into()],
            ..Default::default()
        }
    }

    pub fn if_none_match(etag: impl Into<String>) -> Self {
        Self {
            if_none_match: vec![etag.into()],
            ..Default::default()
        }
    }

    /// Split an `If-Match`-style header into unquoted etags.
    /// Weak validators (`W/"x"`) compare by their opaque value.
    pub fn parse_header(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.trim_start_matches("W/").trim_matches('"').to_string())
            .collect()
    }

    /// `If-None-Match: *`: the request may only create.
    pub fn create_only(&self) -> bool {
        self.if_none_match.iter().any(|e| e == "*")
    }

    /// `If-Match` with concrete etags (or `*`): the request may only replace.
    pub fn replace_only(&self) -> bool {
        !self.if_match.is_empty()
    }

    /// Etag conditions on an existing resource described in `graph`.
    pub fn etag_conditions(&self, graph: &str, iri: &str) -> Vec<Condition> {
        let mut out = Vec::new();
        let etags: Vec<Term> = self
            .if_match
            .iter()
            .filter(|e| e.as_str() != "*")
            .map(|e| Term::literal(e.as_str()))
            .collect();
        if !etags.is_empty() {
            let expected = self.if_match.join(", ");
            out.push(Condition::new(
                "etagMatches",
                etag_in(graph, iri, etags),
                FailureKind::Precondition,
                move || format!("Resource etag does not match If-Match ({})", expected),
            ));
        }

        let avoid: Vec<Term> = self
            .if_none_match
            .iter()
            .filter(|e| e.as_str() != "*")
            .map(|e| Term::literal(e.as_str()))
            .collect();
        if !avoid.is_empty() {
            out.push(Condition::new(
                "etagNotMatches",
                GraphPattern::not_exists(etag_in_pattern(graph, iri, avoid)),
                FailureKind::Precondition,
                || "Resource etag matches If-None-Match".to_string(),
            ));
        }
        out
    }
}

fn etag_in_pattern(graph: &str, iri: &str, etags: Vec<Term>) -> GraphPattern {
    GraphPattern::graph(
        graph,
        GraphPattern::triples([tp(iri, prop::ETAG, Term::var(CURRENT_ETAG))]),
    )
    .and(GraphPattern::Filter(Expr::In(Term::var(CURRENT_ETAG), etags)))
}

fn etag_in(graph: &str, iri: &str, etags: Vec<Term>) -> GraphPattern {
    GraphPattern::exists(etag_in_pattern(graph, iri, etags))
}

/// `GRAPH graph { iri a class }`
pub fn typed(graph: &str, iri: &str, class: &str) -> GraphPattern {
    GraphPattern::graph(graph, GraphPattern::triples([tp(iri, RDF_TYPE, Term::iri(class))]))
}

/// Holds iff `iri` is a `class` in `graph`.
pub fn exists(
    name: &str,
    graph: &str,
    iri: &str,
    class: &str,
    kind: FailureKind,
    message: String,
) -> Condition {
    Condition::new(
        name,
        GraphPattern::exists(typed(graph, iri, class)),
        kind,
        move || message.clone(),
    )
}

/// Holds iff `iri` is not a `class` in `graph`.
pub fn absent(
    name: &str,
    graph: &str,
    iri: &str,
    class: &str,
    kind: FailureKind,
    message: String,
) -> Condition {
    Condition::new(
        name,
        GraphPattern::not_exists(typed(graph, iri, class)),
        kind,
        move || message.clone(),
    )
}

/// Holds iff `reference` still points at a Staging snapshot stored in
/// `staging`. Writes that target a Staging graph read ahead of the
/// transaction carry this so a recreated ref cannot redirect them.
pub fn staging_unchanged(metadata: &str, reference: &str, staging: &str, label: String) -> Condition {
    let snap = Term::var("__mms_staging");
    Condition::new(
        "stagingUnchanged",
        GraphPattern::exists(GraphPattern::graph(
            metadata,
            GraphPattern::triples([
                tp(reference, prop::SNAPSHOT, snap.clone()),
                tp(snap.clone(), RDF_TYPE, Term::iri(class::STAGING)),
                tp(snap, prop::GRAPH, Term::iri(staging)),
            ]),
        )),
        FailureKind::Conflict,
        move || format!("Staging graph of {} changed while the request was processed", label),
    )
}
