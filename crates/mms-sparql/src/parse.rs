//! Parsing of client-submitted SPARQL.
//!
//! User text is parsed with `spargebra` and re-rendered from the AST, so
//! whatever reaches the store is the parser's canonical serialization, never
//! the client's bytes. Two shapes are accepted:
//!
//! - queries, handed to [`crate::sanitize`] for the guarded rewrite
//! - commit patches, restricted to one operation (or DELETE WHERE followed
//!   by INSERT DATA) over the default graph

use spargebra::term::{GraphName, GraphNamePattern};
use spargebra::{GraphUpdateOperation, Update};

use mms_core::{Error, Result};

use crate::builder::{GraphTemplate, UpdateOperation};
use crate::pattern::GraphPattern;
use crate::term::Term;

/// Variables with this prefix are reserved for guard patterns.
pub const RESERVED_VAR_PREFIX: &str = "__mms";

/// Keywords that would let a pattern read outside its assigned graph.
pub(crate) const SCOPE_ESCAPE_KEYWORDS: [&str; 2] = ["GRAPH", "SERVICE"];

/// Query form, used to pick a default response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryForm {
    Select,
    Construct,
    Describe,
    Ask,
}

/// One operation of a commit patch, rendered as default-graph fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOperation {
    InsertData(Vec<String>),
    DeleteData(Vec<String>),
    Modify {
        delete: Vec<String>,
        insert: Vec<String>,
        pattern: String,
    },
}

/// A validated commit patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub operations: Vec<PatchOperation>,
    /// Canonical text of the whole update, stored with the commit.
    pub normalized: String,
}

impl Patch {
    /// Parse and validate a commit update.
    ///
    /// Accepts exactly one INSERT DATA, DELETE DATA or DELETE/INSERT WHERE
    /// operation, or DELETE WHERE immediately followed by INSERT DATA.
    pub fn parse(text: &str) -> Result<Self> {
        let update = Update::parse(text, None).map_err(|e| Error::Parse(e.to_string()))?;

        let ops = &update.operations;
        let shape_ok = match ops.as_slice() {
            [single] => !matches!(
                single,
                GraphUpdateOperation::Load { .. }
                    | GraphUpdateOperation::Clear { .. }
                    | GraphUpdateOperation::Create { .. }
                    | GraphUpdateOperation::Drop { .. }
            ),
            [GraphUpdateOperation::DeleteInsert { insert, .. }, GraphUpdateOperation::InsertData { .. }] => {
                insert.is_empty()
            }
            _ => false,
        };
        if !shape_ok {
            return Err(Error::InvalidInput(
                "a commit must be a single INSERT DATA, DELETE DATA or DELETE/INSERT operation, \
                 or DELETE WHERE followed by INSERT DATA"
                    .into(),
            ));
        }

        let operations = ops.iter().map(convert_operation).collect::<Result<Vec<_>>>()?;
        Ok(Self {
            operations,
            normalized: update.to_string(),
        })
    }

    /// Update operations applying this patch to `graph`.
    ///
    /// Every operation's WHERE clause is conjoined with `gate`, which lets
    /// the patch ride in the same request as a guarded write and only take
    /// effect when that write did.
    pub fn apply_to(&self, graph: &str, gate: &GraphPattern) -> Vec<UpdateOperation> {
        let tmpl = |lines: &[String]| vec![GraphTemplate::verbatim(Term::iri(graph), lines.to_vec())];
        self.operations
            .iter()
            .map(|op| match op {
                PatchOperation::InsertData(lines) => {
                    UpdateOperation::modify(Vec::new(), tmpl(lines), gate.clone())
                }
                PatchOperation::DeleteData(lines) => {
                    UpdateOperation::modify(tmpl(lines), Vec::new(), gate.clone())
                }
                PatchOperation::Modify {
                    delete,
                    insert,
                    pattern,
                } => UpdateOperation::modify(
                    tmpl(delete),
                    tmpl(insert),
                    gate.clone().and(GraphPattern::graph(
                        Term::iri(graph),
                        GraphPattern::Verbatim(pattern.clone()),
                    )),
                ),
            })
            .collect()
    }
}

fn convert_operation(op: &GraphUpdateOperation) -> Result<PatchOperation> {
    match op {
        GraphUpdateOperation::InsertData { data } => {
            let mut lines = Vec::with_capacity(data.len());
            for q in data {
                if q.graph_name != GraphName::DefaultGraph {
                    return Err(graph_clause_error());
                }
                lines.push(format!("{} {} {} .", q.subject, q.predicate, q.object));
            }
            Ok(PatchOperation::InsertData(lines))
        }
        GraphUpdateOperation::DeleteData { data } => {
            let mut lines = Vec::with_capacity(data.len());
            for q in data {
                if q.graph_name != GraphName::DefaultGraph {
                    return Err(graph_clause_error());
                }
                lines.push(format!("{} {} {} .", q.subject, q.predicate, q.object));
            }
            Ok(PatchOperation::DeleteData(lines))
        }
        GraphUpdateOperation::DeleteInsert {
            delete,
            insert,
            using,
            pattern,
        } => {
            if using.is_some() {
                return Err(Error::InvalidInput(
                    "USING clauses are not allowed in commits".into(),
                ));
            }
            let mut delete_lines = Vec::with_capacity(delete.len());
            for q in delete {
                if q.graph_name != GraphNamePattern::DefaultGraph {
                    return Err(graph_clause_error());
                }
                delete_lines.push(format!("{} {} {} .", q.subject, q.predicate, q.object));
            }
            let mut insert_lines = Vec::with_capacity(insert.len());
            for q in insert {
                if q.graph_name != GraphNamePattern::DefaultGraph {
                    return Err(graph_clause_error());
                }
                insert_lines.push(format!("{} {} {} .", q.subject, q.predicate, q.object));
            }

            let pattern = pattern.to_string();
            if let Some(kw) = find_keyword(&pattern, &SCOPE_ESCAPE_KEYWORDS) {
                return Err(Error::InvalidInput(format!(
                    "{} patterns are not allowed in commits",
                    kw
                )));
            }
            let all = delete_lines.iter().chain(&insert_lines).chain(Some(&pattern));
            for text in all {
                if mentions_reserved_var(text) {
                    return Err(Error::InvalidInput(format!(
                        "variables starting with '{}' are reserved",
                        RESERVED_VAR_PREFIX
                    )));
                }
            }
            Ok(PatchOperation::Modify {
                delete: delete_lines,
                insert: insert_lines,
                pattern,
            })
        }
        _ => Err(Error::InvalidInput(
            "graph management operations are not allowed in commits".into(),
        )),
    }
}

fn graph_clause_error() -> Error {
    Error::InvalidInput("GRAPH clauses are not allowed in commits; updates apply to the branch".into())
}

pub(crate) fn mentions_reserved_var(text: &str) -> bool {
    text.contains(&format!("?{}", RESERVED_VAR_PREFIX))
        || text.contains(&format!("${}", RESERVED_VAR_PREFIX))
}

/// Find the first of `keywords` used as a keyword in canonical SPARQL text.
///
/// String literals, IRI references, variables, prefixed/blank-node labels
/// and language tags are skipped, so `"GRAPH"` or `?graph` never match.
pub fn find_keyword(text: &str, keywords: &[&'static str]) -> Option<&'static str> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
            }
            b'<' => {
                i = skip_iri(bytes, i);
            }
            b'?' | b'$' | b'@' | b':' => {
                i += 1;
                while i < bytes.len() && is_name_byte(bytes[i]) {
                    i += 1;
                }
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < bytes.len() && is_name_byte(bytes[i]) {
                    i += 1;
                }
                let word = &text[start..i];
                if let Some(kw) = keywords.iter().find(|kw| kw.eq_ignore_ascii_case(word)) {
                    return Some(*kw);
                }
            }
            _ => i += 1,
        }
    }
    None
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b >= 0x80
}

fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let long = bytes.len() >= start + 3 && bytes[start + 1] == quote && bytes[start + 2] == quote;
    let mut i = if long { start + 3 } else { start + 1 };
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => {
                if !long {
                    return i + 1;
                }
                if bytes.len() >= i + 3 && bytes[i + 1] == quote && bytes[i + 2] == quote {
                    return i + 3;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Skip an IRIREF; a `<` not followed by a well-formed IRIREF is an operator.
fn skip_iri(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'>' => return i + 1,
            b'<' | b'"' | b'{' | b'}' | b'|' | b'^' | b'`' | b'\\' => return start + 1,
            b if b <= 0x20 => return start + 1,
            _ => i += 1,
        }
    }
    start + 1
}
