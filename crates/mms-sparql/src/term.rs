//! RDF terms and SPARQL variables.
//!
//! Every value that reaches query text goes through [`Term`]'s `Display`,
//! which escapes literals and percent-encodes characters that are not
//! allowed inside an IRI reference. Callers never splice raw strings.

use std::fmt;

use mms_core::vocab::{XSD_DATE_TIME, XSD_INTEGER};

/// An RDF literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Literal {
    Simple(String),
    LanguageTagged { value: String, language: String },
    Typed { value: String, datatype: String },
}

impl Literal {
    pub fn value(&self) -> &str {
        match self {
            Literal::Simple(value)
            | Literal::LanguageTagged { value, .. }
            | Literal::Typed { value, .. } => value,
        }
    }
}

/// A SPARQL term: ground RDF term or query variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Iri(String),
    Literal(Literal),
    BlankNode(String),
    Variable(String),
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Term::Variable(name.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal(Literal::Simple(value.into()))
    }

    pub fn typed(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal(Literal::Typed {
            value: value.into(),
            datatype: datatype.into(),
        })
    }

    pub fn lang(value: impl Into<String>, language: impl Into<String>) -> Self {
        Term::Literal(Literal::LanguageTagged {
            value: value.into(),
            language: language.into(),
        })
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::BlankNode(label.into())
    }

    pub fn date_time(value: &chrono::DateTime<chrono::Utc>) -> Self {
        Term::typed(
            value.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            XSD_DATE_TIME,
        )
    }

    pub fn integer(value: i64) -> Self {
        Term::typed(value.to_string(), XSD_INTEGER)
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Term::Variable(_))
    }

    /// Whether this term may appear in `INSERT DATA` / N-Triples.
    pub fn is_ground(&self) -> bool {
        !self.is_variable()
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    /// Lexical value of an IRI or literal.
    pub fn value(&self) -> &str {
        match self {
            Term::Iri(v) | Term::BlankNode(v) | Term::Variable(v) => v,
            Term::Literal(lit) => lit.value(),
        }
    }
}

impl From<&str> for Term {
    fn from(iri: &str) -> Self {
        Term::iri(iri)
    }
}

impl From<String> for Term {
    fn from(iri: String) -> Self {
        Term::Iri(iri)
    }
}

impl From<&String> for Term {
    fn from(iri: &String) -> Self {
        Term::Iri(iri.clone())
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write_iri(f, iri),
            Term::Literal(lit) => write!(f, "{}", lit),
            Term::BlankNode(label) => write!(f, "_:{}", sanitize_name(label)),
            Term::Variable(name) => write!(f, "?{}", sanitize_name(name)),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Simple(value) => write_quoted(f, value),
            Literal::LanguageTagged { value, language } => {
                write_quoted(f, value)?;
                let tag: String = language
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
                    .collect();
                write!(f, "@{}", tag)
            }
            Literal::Typed { value, datatype } => {
                write_quoted(f, value)?;
                f.write_str("^^")?;
                write_iri(f, datatype)
            }
        }
    }
}

/// Write `<iri>`, percent-encoding anything IRIREF forbids.
pub(crate) fn write_iri(f: &mut impl fmt::Write, iri: &str) -> fmt::Result {
    f.write_char('<')?;
    for c in iri.chars() {
        match c {
            '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\' => {
                write!(f, "%{:02X}", c as u32)?;
            }
            c if (c as u32) <= 0x20 => write!(f, "%{:02X}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('>')
}

fn write_quoted(f: &mut impl fmt::Write, value: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in value.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04X}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// A ground triple, as parsed from a document or returned by CONSTRUCT.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: impl Into<Term>, predicate: impl Into<Term>, object: Term) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
        }
    }
}

/// N-Triples line (without trailing newline).
impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iri_rendering() {
        assert_eq!(Term::iri("http://x/a").to_string(), "<http://x/a>");
    }

    #[test]
    fn test_iri_injection_is_encoded() {
        let term = Term::iri("http://x/a> } ; DROP ALL ; INSERT DATA { <y");
        let rendered = term.to_string();
        assert!(!rendered[1..rendered.len() - 1].contains('>'));
        assert!(!rendered.contains('}'));
        assert!(!rendered.contains(' '));
        assert!(rendered.starts_with("<http://x/a%3E%20%7D"));
    }

    #[test]
    fn test_literal_escaping() {
        let term = Term::literal("say \"hi\"\n\\");
        assert_eq!(term.to_string(), r#""say \"hi\"\n\\""#);
    }

    #[test]
    fn test_typed_and_lang_literals() {
        assert_eq!(
            Term::integer(5).to_string(),
            "\"5\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );
        assert_eq!(Term::lang("hi", "en-US").to_string(), "\"hi\"@en-US");
        assert_eq!(Term::lang("hi", "en\"} x").to_string(), "\"hi\"@enx");
    }

    #[test]
    fn test_variable_names_sanitized() {
        assert_eq!(Term::var("__mms_etag").to_string(), "?__mms_etag");
        assert_eq!(Term::var("a b}").to_string(), "?a_b_");
    }

    #[test]
    fn test_triple_is_ntriples_line() {
        let t = Triple::new("http://s", "http://p", Term::literal("o"));
        assert_eq!(t.to_string(), "<http://s> <http://p> \"o\" .");
    }

    #[test]
    fn test_date_time_literal() {
        let ts = chrono::DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(Term::date_time(&ts).value(), "2026-01-02T03:04:05.000Z");
    }
}
