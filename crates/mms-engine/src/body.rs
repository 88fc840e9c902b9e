//! Client-supplied resource descriptions.

use mms_core::vocab::{is_managed, prop, RDF_TYPE};
use mms_core::{Error, Result};
use mms_sparql::rdf::{self, RdfFormat};
use mms_sparql::{tp, Term, Triple, TriplePattern};

/// An RDF request body and its declared format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdfBody {
    pub text: String,
    pub format: RdfFormat,
}

impl RdfBody {
    pub fn new(text: impl Into<String>, format: RdfFormat) -> Self {
        Self {
            text: text.into(),
            format,
        }
    }

    pub fn turtle(text: impl Into<String>) -> Self {
        Self::new(text, RdfFormat::Turtle)
    }

    /// Parse with `base` as the document base, so `<>` denotes the resource.
    pub fn parse(&self, base: &str) -> Result<Vec<Triple>> {
        if self.text.trim().is_empty() {
            return Ok(Vec::new());
        }
        rdf::parse(&self.text, self.format, Some(base))
    }
}

/// A parsed description split into server-consumed directives and
/// client triples to store verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Description {
    pub directives: Vec<Triple>,
    pub triples: Vec<Triple>,
}

impl Description {
    /// Validate a description of `iri`.
    ///
    /// Every triple must be about `iri` (or a blank node). Server-managed
    /// predicates are rejected, except those in `directives`, which are
    /// returned separately for the caller to interpret.
    pub fn of(iri: &str, triples: Vec<Triple>, directives: &[&str]) -> Result<Self> {
        let mut out = Description::default();
        for t in triples {
            match &t.subject {
                Term::Iri(s) if s == iri => {}
                Term::BlankNode(_) => {}
                other => {
                    return Err(Error::InvalidInput(format!(
                        "Body may only describe <{}>, found subject {}",
                        iri, other
                    )))
                }
            }
            let predicate = t.predicate.as_iri().unwrap_or_default();
            if directives.contains(&predicate) {
                out.directives.push(t);
            } else if is_managed(predicate, &[]) {
                return Err(Error::InvalidInput(format!(
                    "Predicate <{}> is managed by the server",
                    predicate
                )));
            } else if predicate == RDF_TYPE && t.object.as_iri().is_some_and(|o| is_managed(o, &[])) {
                // the server asserts its own types
            } else {
                out.triples.push(t);
            }
        }
        Ok(out)
    }

    /// Object IRI of the first directive with `predicate`.
    pub fn directive(&self, predicate: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|t| t.predicate.as_iri() == Some(predicate))
            .and_then(|t| t.object.as_iri())
    }

    pub fn patterns(&self) -> Vec<TriplePattern> {
        self.triples.iter().map(to_pattern).collect()
    }
}

pub(crate) fn to_pattern(t: &Triple) -> TriplePattern {
    tp(t.subject.clone(), t.predicate.clone(), t.object.clone())
}

/// Triples every server-managed resource carries.
pub(crate) fn managed_triples(
    iri: &str,
    class: &str,
    id: &str,
    etag: Term,
    created: Term,
    user: &str,
) -> Vec<TriplePattern> {
    vec![
        tp(iri, RDF_TYPE, Term::iri(class)),
        tp(iri, prop::ID, Term::literal(id)),
        tp(iri, prop::ETAG, etag),
        tp(iri, prop::CREATED, created),
        tp(iri, prop::CREATED_BY, Term::iri(user)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use mms_core::vocab::{class, DCT_TITLE};

    const ORG: &str = "http://mms.test/orgs/acme";

    #[test]
    fn test_relative_iri_resolves_to_resource() {
        let triples = RdfBody::turtle(r#"<> <http://purl.org/dc/terms/title> "Acme" ."#)
            .parse(ORG)
            .unwrap();
        let desc = Description::of(ORG, triples, &[]).unwrap();
        assert_eq!(desc.triples.len(), 1);
        assert_eq!(desc.triples[0].predicate.as_iri(), Some(DCT_TITLE));
    }

    #[test]
    fn test_foreign_subject_rejected() {
        let triples = RdfBody::turtle(r#"<http://elsewhere/x> <urn:p> "v" ."#)
            .parse(ORG)
            .unwrap();
        let err = Description::of(ORG, triples, &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_managed_predicate_rejected() {
        let body = format!(r#"<> <{}> "forged" ."#, prop::ETAG);
        let triples = RdfBody::turtle(body).parse(ORG).unwrap();
        assert!(Description::of(ORG, triples, &[]).is_err());
    }

    #[test]
    fn test_directives_are_separated() {
        let body = format!("<> <{}> <../branches/master> .", prop::REF);
        let base = "http://mms.test/orgs/acme/repos/r/branches/dev";
        let triples = RdfBody::turtle(body).parse(base).unwrap();
        let desc = Description::of(base, triples, &[prop::REF, prop::COMMIT]).unwrap();
        assert!(desc.triples.is_empty());
        assert_eq!(
            desc.directive(prop::REF),
            Some("http://mms.test/orgs/acme/repos/r/branches/master")
        );
    }

    #[test]
    fn test_own_type_assertion_is_dropped() {
        let body = format!("<> a <{}> .", class::ORG);
        let triples = RdfBody::turtle(body).parse(ORG).unwrap();
        let desc = Description::of(ORG, triples, &[]).unwrap();
        assert!(desc.triples.is_empty());
    }

    #[test]
    fn test_empty_body() {
        assert!(RdfBody::turtle("  \n").parse(ORG).unwrap().is_empty());
    }
}
