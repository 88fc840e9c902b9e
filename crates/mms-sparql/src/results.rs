//! SPARQL 1.1 Query Results JSON decoding.

use std::collections::HashMap;

use serde::Deserialize;

use mms_core::{Error, Result};

use crate::term::Term;

#[derive(Debug, Deserialize)]
struct ResultsDocument {
    #[serde(default)]
    head: Head,
    results: Option<Bindings>,
    boolean: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct Head {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Bindings {
    bindings: Vec<HashMap<String, JsonTerm>>,
}

#[derive(Debug, Deserialize)]
struct JsonTerm {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    #[serde(rename = "xml:lang")]
    lang: Option<String>,
    datatype: Option<String>,
}

impl JsonTerm {
    fn into_term(self) -> Result<Term> {
        match self.kind.as_str() {
            "uri" => Ok(Term::Iri(self.value)),
            "bnode" => Ok(Term::BlankNode(self.value)),
            // "typed-literal" is emitted by some SPARQL 1.0-era stores
            "literal" | "typed-literal" => Ok(match (self.lang, self.datatype) {
                (Some(lang), _) => Term::lang(self.value, lang),
                (None, Some(dt)) => Term::typed(self.value, dt),
                (None, None) => Term::literal(self.value),
            }),
            other => Err(Error::Serialization(format!(
                "unknown SPARQL JSON term type: {}",
                other
            ))),
        }
    }
}

/// One row of a SELECT result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Solution(HashMap<String, Term>);

impl Solution {
    pub fn get(&self, var: &str) -> Option<&Term> {
        self.0.get(var)
    }

    /// Lexical value of a bound variable.
    pub fn value(&self, var: &str) -> Option<&str> {
        self.get(var).map(Term::value)
    }

    pub fn iri(&self, var: &str) -> Option<&str> {
        self.get(var).and_then(Term::as_iri)
    }
}

/// Decoded SELECT result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Solutions {
    pub variables: Vec<String>,
    pub rows: Vec<Solution>,
}

impl Solutions {
    pub fn parse(json: &str) -> Result<Self> {
        let doc: ResultsDocument = serde_json::from_str(json)?;
        let bindings = doc
            .results
            .ok_or_else(|| Error::Serialization("SPARQL results without bindings".into()))?;
        let rows = bindings
            .bindings
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(k, v)| v.into_term().map(|t| (k, t)))
                    .collect::<Result<HashMap<_, _>>>()
                    .map(Solution)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            variables: doc.head.vars,
            rows,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Solution> {
        self.rows.first()
    }
}

/// Decode an ASK result.
pub fn parse_boolean(json: &str) -> Result<bool> {
    let doc: ResultsDocument = serde_json::from_str(json)?;
    doc.boolean
        .ok_or_else(|| Error::Serialization("SPARQL results without boolean".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "head": { "vars": ["org", "title", "n"] },
        "results": { "bindings": [
            {
                "org": { "type": "uri", "value": "http://mms.test/orgs/acme" },
                "title": { "type": "literal", "value": "Acme", "xml:lang": "en" },
                "n": { "type": "literal", "value": "3", "datatype": "http://www.w3.org/2001/XMLSchema#integer" }
            },
            { "org": { "type": "bnode", "value": "b0" } }
        ] }
    }"#;

    #[test]
    fn test_parse_select() {
        let s = Solutions::parse(DOC).unwrap();
        assert_eq!(s.variables, vec!["org", "title", "n"]);
        assert_eq!(s.rows.len(), 2);
        let row = s.first().unwrap();
        assert_eq!(row.iri("org"), Some("http://mms.test/orgs/acme"));
        assert_eq!(row.get("title"), Some(&Term::lang("Acme", "en")));
        assert_eq!(row.get("n"), Some(&Term::integer(3)));
        assert_eq!(s.rows[1].get("org"), Some(&Term::blank("b0")));
        assert!(s.rows[1].get("title").is_none());
    }

    #[test]
    fn test_parse_empty_select() {
        let s = Solutions::parse(r#"{"head":{"vars":["x"]},"results":{"bindings":[]}}"#).unwrap();
        assert!(s.is_empty());
    }

    #[test]
    fn test_parse_boolean() {
        assert!(parse_boolean(r#"{"head":{},"boolean":true}"#).unwrap());
        assert!(parse_boolean(r#"{"head":{},"results":{"bindings":[]}}"#).is_err());
    }

    #[test]
    fn test_unknown_term_type() {
        let doc = r#"{"head":{"vars":["x"]},"results":{"bindings":[{"x":{"type":"weird","value":"v"}}]}}"#;
        assert!(matches!(Solutions::parse(doc), Err(Error::Serialization(_))));
    }
}
