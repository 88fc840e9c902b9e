//! RDF document codec: Turtle / N-Triples in, N-Triples / Turtle out.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use oxiri::Iri;
use rio_api::model as rio;
use rio_api::parser::TriplesParser;
use rio_turtle::{NTriplesParser, TurtleError, TurtleParser};

use mms_core::vocab::{MMS, RDF_TYPE};
use mms_core::{Error, Result};

use crate::term::{Literal, Term, Triple};

pub const TURTLE: &str = "text/turtle";

/// Serialization formats the layer can read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdfFormat {
    Turtle,
    NTriples,
}

impl RdfFormat {
    pub fn media_type(self) -> &'static str {
        match self {
            RdfFormat::Turtle => TURTLE,
            RdfFormat::NTriples => mms_core::N_TRIPLES,
        }
    }

    /// Match a Content-Type / Accept media range (parameters ignored).
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "text/turtle" | "application/x-turtle" => Some(RdfFormat::Turtle),
            "application/n-triples" | "text/plain" => Some(RdfFormat::NTriples),
            _ => None,
        }
    }
}

/// Parse a document into triples, resolving relative IRIs against `base`.
pub fn parse(text: &str, format: RdfFormat, base: Option<&str>) -> Result<Vec<Triple>> {
    let mut converted: Vec<std::result::Result<Triple, String>> = Vec::new();
    let outcome = match format {
        RdfFormat::Turtle => {
            let base = match base {
                Some(b) => Some(
                    Iri::parse(b.to_string())
                        .map_err(|e| Error::Internal(format!("invalid base IRI {}: {}", b, e)))?,
                ),
                None => None,
            };
            TurtleParser::new(text.as_bytes(), base).parse_all(&mut |t| {
                converted.push(convert_triple(&t));
                Ok(()) as std::result::Result<(), TurtleError>
            })
        }
        RdfFormat::NTriples => NTriplesParser::new(text.as_bytes()).parse_all(&mut |t| {
            converted.push(convert_triple(&t));
            Ok(()) as std::result::Result<(), TurtleError>
        }),
    };
    outcome.map_err(|e| Error::Parse(e.to_string()))?;
    converted
        .into_iter()
        .collect::<std::result::Result<Vec<_>, String>>()
        .map_err(Error::Parse)
}

/// Parse the N-Triples document returned by a CONSTRUCT query.
pub fn parse_ntriples(text: &str) -> Result<Vec<Triple>> {
    parse(text, RdfFormat::NTriples, None)
}

fn convert_triple(t: &rio::Triple<'_>) -> std::result::Result<Triple, String> {
    let subject = match t.subject {
        rio::Subject::NamedNode(n) => Term::iri(n.iri),
        rio::Subject::BlankNode(b) => Term::blank(b.id),
        rio::Subject::Triple(_) => return Err("RDF-star triples are not supported".into()),
    };
    let object = match t.object {
        rio::Term::NamedNode(n) => Term::iri(n.iri),
        rio::Term::BlankNode(b) => Term::blank(b.id),
        rio::Term::Literal(rio::Literal::Simple { value }) => Term::literal(value),
        rio::Term::Literal(rio::Literal::LanguageTaggedString { value, language }) => {
            Term::lang(value, language)
        }
        rio::Term::Literal(rio::Literal::Typed { value, datatype }) => {
            Term::typed(value, datatype.iri)
        }
        rio::Term::Triple(_) => return Err("RDF-star triples are not supported".into()),
    };
    Ok(Triple {
        subject,
        predicate: Term::iri(t.predicate.iri),
        object,
    })
}

/// Serialize triples in the requested format.
pub fn serialize(triples: &[Triple], format: RdfFormat) -> String {
    match format {
        RdfFormat::NTriples => to_ntriples(triples),
        RdfFormat::Turtle => to_turtle(triples),
    }
}

pub fn to_ntriples(triples: &[Triple]) -> String {
    let mut out = String::new();
    for t in triples {
        let _ = writeln!(out, "{}", t);
    }
    out
}

const PREFIXES: [(&str, &str); 4] = [
    ("mms", MMS),
    ("dct", "http://purl.org/dc/terms/"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
];

/// Turtle with the layer's prefixes, grouped by subject.
pub fn to_turtle(triples: &[Triple]) -> String {
    let mut by_subject: BTreeMap<&Term, Vec<&Triple>> = BTreeMap::new();
    for t in triples {
        by_subject.entry(&t.subject).or_default().push(t);
    }

    let mut out = String::new();
    for (prefix, ns) in PREFIXES {
        let _ = writeln!(out, "@prefix {}: <{}> .", prefix, ns);
    }

    for (subject, group) in by_subject {
        let _ = write!(out, "\n{}", subject);
        for (i, t) in group.iter().enumerate() {
            let sep = if i == 0 { " " } else { " ;\n    " };
            let _ = write!(out, "{}{} {}", sep, compact_predicate(&t.predicate), compact(&t.object));
        }
        out.push_str(" .\n");
    }
    out
}

fn compact_predicate(term: &Term) -> String {
    if term.as_iri() == Some(RDF_TYPE) {
        return "a".to_string();
    }
    compact(term)
}

fn compact(term: &Term) -> String {
    match term {
        Term::Iri(iri) => compact_iri(iri).unwrap_or_else(|| term.to_string()),
        Term::Literal(Literal::Typed { value, datatype }) => match compact_iri(datatype) {
            Some(dt) => format!("{}^^{}", Term::literal(value.as_str()), dt),
            None => term.to_string(),
        },
        other => other.to_string(),
    }
}

fn compact_iri(iri: &str) -> Option<String> {
    PREFIXES.iter().find_map(|(prefix, ns)| {
        let local = iri.strip_prefix(ns)?;
        is_safe_local(local).then(|| format!("{}:{}", prefix, local))
    })
}

fn is_safe_local(local: &str) -> bool {
    let mut chars = local.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    !local.ends_with('.')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use mms_core::vocab::{class, prop, DCT_TITLE};

    #[test]
    fn test_parse_turtle_with_relative_subject() {
        let doc = r#"
            @prefix dct: <http://purl.org/dc/terms/> .
            <> dct:title "Acme" .
        "#;
        let triples = parse(doc, RdfFormat::Turtle, Some("http://mms.test/orgs/acme")).unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].subject, Term::iri("http://mms.test/orgs/acme"));
        assert_eq!(triples[0].predicate, Term::iri(DCT_TITLE));
        assert_eq!(triples[0].object, Term::literal("Acme"));
    }

    #[test]
    fn test_parse_malformed_turtle() {
        let err = parse("<a> <b> .", RdfFormat::Turtle, Some("http://x/")).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_parse_ntriples_literals() {
        let doc = "<http://s> <http://p> \"x\"@en .\n<http://s> <http://p> \"5\"^^<http://www.w3.org/2001/XMLSchema#integer> .\n";
        let triples = parse_ntriples(doc).unwrap();
        assert_eq!(triples[0].object, Term::lang("x", "en"));
        assert_eq!(triples[1].object, Term::integer(5));
    }

    #[test]
    fn test_ntriples_output_parses_back() {
        let triples = vec![Triple::new("http://s", "http://p", Term::literal("a \"q\"\nb"))];
        let back = parse_ntriples(&to_ntriples(&triples)).unwrap();
        assert_eq!(back, triples);
    }

    #[test]
    fn test_turtle_output_uses_prefixes() {
        let s = "http://mms.test/orgs/acme";
        let triples = vec![
            Triple::new(s, RDF_TYPE, Term::iri(class::ORG)),
            Triple::new(s, prop::ID, Term::literal("acme")),
        ];
        let ttl = to_turtle(&triples);
        assert!(ttl.contains("a mms:Org"));
        assert!(ttl.contains("mms:id \"acme\""));

        let back = parse(&ttl, RdfFormat::Turtle, None).unwrap();
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn test_media_type_matching() {
        assert_eq!(
            RdfFormat::from_media_type("text/turtle; charset=utf-8"),
            Some(RdfFormat::Turtle)
        );
        assert_eq!(
            RdfFormat::from_media_type("application/n-triples"),
            Some(RdfFormat::NTriples)
        );
        assert_eq!(RdfFormat::from_media_type("application/ld+json"), None);
    }
}
