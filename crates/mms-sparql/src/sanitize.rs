//! Client queries with the caller's authorization folded in.
//!
//! A client query is parsed once, then rewritten so the store evaluates the
//! access check in the same request as the query itself:
//!
//! - the client's pattern is joined with the guard, so it yields nothing
//!   unless the guard holds
//! - a marker branch, UNIONed beside it, yields one extra solution binding
//!   [`AUTH_VAR`] exactly when the guard holds
//!
//! SELECT projects the marker variable, CONSTRUCT emits a marker triple,
//! ASK is asked as a SELECT and DESCRIBE as a CONSTRUCT of the described
//! resources' outgoing triples. [`GuardedQuery::unguard`] strips the marker
//! from the response; `None` means the guard did not hold.

use serde_json::Value;
use spargebra::algebra::{Expression, GraphPattern as Algebra, QueryDataset};
use spargebra::term::{Literal, NamedNode, NamedNodePattern, TermPattern, TriplePattern as Template, Variable};
use spargebra::Query;

use mms_core::vocab::marker;
use mms_core::{Error, Result, N_TRIPLES, SPARQL_RESULTS_JSON};

use crate::parse::{find_keyword, mentions_reserved_var, QueryForm, RESERVED_VAR_PREFIX, SCOPE_ESCAPE_KEYWORDS};
use crate::pattern::GraphPattern;
use crate::rdf::parse_ntriples;
use crate::term::Triple;

/// Bound to [`marker::PERMITTED`] in the marker solution only.
pub const AUTH_VAR: &str = "__mms_auth";
/// Bound in every data solution of a rewritten ASK.
const ASK_VAR: &str = "__mms_ask";
/// Resource being described in a rewritten DESCRIBE.
const DESCRIBED: &str = "__mms_r";
const DESCRIBED_P: &str = "__mms_dp";
const DESCRIBED_O: &str = "__mms_do";
/// Prefix of the variables standing in for ground template predicates.
const GROUND_PREDICATE: &str = "__mms_gp";

/// A parsed, validated client query not yet bound to a graph.
#[derive(Debug, Clone)]
pub struct ClientQuery {
    query: Query,
    form: QueryForm,
}

impl ClientQuery {
    /// Parse `text` and reject what a guarded rewrite cannot contain.
    ///
    /// GRAPH and SERVICE are refused because the guard reads named graphs
    /// of the rewritten dataset. Reserved variables are refused so client
    /// patterns cannot bind the marker.
    pub fn parse(text: &str) -> Result<Self> {
        let query = Query::parse(text, None).map_err(|e| Error::Parse(e.to_string()))?;
        let canonical = query.to_string();
        if let Some(kw) = find_keyword(&canonical, &SCOPE_ESCAPE_KEYWORDS) {
            return Err(Error::InvalidInput(format!(
                "{} patterns are not allowed in model queries",
                kw
            )));
        }
        if mentions_reserved_var(&canonical) {
            return Err(Error::InvalidInput(format!(
                "variables starting with '{}' are reserved",
                RESERVED_VAR_PREFIX
            )));
        }
        let form = match &query {
            Query::Select { .. } => QueryForm::Select,
            Query::Construct { .. } => QueryForm::Construct,
            Query::Describe { .. } => QueryForm::Describe,
            Query::Ask { .. } => QueryForm::Ask,
        };
        Ok(Self { query, form })
    }

    pub fn form(&self) -> QueryForm {
        self.form
    }

    /// Rewrite against `graph` as the only default graph.
    ///
    /// `guard` is evaluated with `named` as the named graphs; any FROM or
    /// FROM NAMED the client supplied is discarded.
    pub fn guard(&self, graph: &str, guard: &GraphPattern, named: &[&str]) -> Result<GuardedQuery> {
        let dataset = QueryDataset {
            default: vec![named_node(graph)?],
            named: Some(named.iter().map(|g| named_node(g)).collect::<Result<Vec<_>>>()?),
        };
        let check = guard_check(guard)?;
        let marker_branch = guard_marker(guard)?;

        let query = match self.query.clone() {
            Query::Select { pattern, base_iri, .. } => {
                let mut variables = in_scope(&pattern);
                variables.push(var(AUTH_VAR));
                Query::Select {
                    dataset: Some(dataset),
                    pattern: Algebra::Project {
                        inner: Box::new(union(join(pattern, check), marker_branch)),
                        variables,
                    },
                    base_iri,
                }
            }
            Query::Ask { pattern, base_iri, .. } => {
                let first = Algebra::Slice {
                    inner: Box::new(pattern),
                    start: 0,
                    length: Some(1),
                };
                let data = Algebra::Extend {
                    inner: Box::new(join(first, check)),
                    variable: var(ASK_VAR),
                    expression: Expression::Literal(Literal::from(true)),
                };
                Query::Select {
                    dataset: Some(dataset),
                    pattern: Algebra::Project {
                        inner: Box::new(union(data, marker_branch)),
                        variables: vec![var(ASK_VAR), var(AUTH_VAR)],
                    },
                    base_iri,
                }
            }
            Query::Construct {
                template,
                pattern,
                base_iri,
                ..
            } => {
                let mut data = join(pattern, check);
                let mut guarded = Vec::with_capacity(template.len() + 1);
                for (i, triple) in template.into_iter().enumerate() {
                    match (has_variable(&triple), triple.predicate) {
                        // ground triples would also be emitted for the marker solution
                        (false, NamedNodePattern::NamedNode(predicate)) => {
                            let v = var(&format!("{}{}", GROUND_PREDICATE, i));
                            data = Algebra::Extend {
                                inner: Box::new(data),
                                variable: v.clone(),
                                expression: Expression::NamedNode(predicate),
                            };
                            guarded.push(Template {
                                subject: triple.subject,
                                predicate: v.into(),
                                object: triple.object,
                            });
                        }
                        (_, predicate) => guarded.push(Template {
                            subject: triple.subject,
                            predicate,
                            object: triple.object,
                        }),
                    }
                }
                guarded.push(marker_template());
                Query::Construct {
                    template: guarded,
                    dataset: Some(dataset),
                    pattern: union(data, marker_branch),
                    base_iri,
                }
            }
            Query::Describe { pattern, base_iri, .. } => {
                let described = in_scope(&pattern);
                let resource = var(DESCRIBED);
                let mut branches = described.into_iter().map(|v| Algebra::Extend {
                    inner: Box::new(pattern.clone()),
                    variable: resource.clone(),
                    expression: Expression::Variable(v),
                });
                let first = branches
                    .next()
                    .ok_or_else(|| Error::InvalidInput("DESCRIBE names no resource".into()))?;
                let resources = Algebra::Filter {
                    expr: Expression::Bound(resource.clone()),
                    inner: Box::new(branches.fold(first, union)),
                };
                let outgoing = Template {
                    subject: resource.clone().into(),
                    predicate: var(DESCRIBED_P).into(),
                    object: var(DESCRIBED_O).into(),
                };
                let data = join(
                    join(resources, Algebra::Bgp { patterns: vec![outgoing.clone()] }),
                    check,
                );
                Query::Construct {
                    template: vec![outgoing, marker_template()],
                    dataset: Some(dataset),
                    pattern: union(data, marker_branch),
                    base_iri,
                }
            }
        };

        Ok(GuardedQuery {
            form: self.form,
            sparql: query.to_string(),
        })
    }
}

/// A rewritten query ready for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedQuery {
    pub form: QueryForm,
    pub sparql: String,
}

/// A query response with the marker removed.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardedAnswer {
    /// SPARQL results JSON: rows for SELECT, a boolean for ASK.
    Results(String),
    Graph(Vec<Triple>),
}

impl GuardedQuery {
    /// Media type to request from the store.
    pub fn store_accept(&self) -> &'static str {
        match self.form {
            QueryForm::Select | QueryForm::Ask => SPARQL_RESULTS_JSON,
            QueryForm::Construct | QueryForm::Describe => N_TRIPLES,
        }
    }

    /// Strip the marker from a store response. `None` when the marker is
    /// absent, meaning the guard did not hold.
    pub fn unguard(&self, body: &str) -> Result<Option<GuardedAnswer>> {
        match self.form {
            QueryForm::Select => Ok(strip_rows(body)?.map(|doc| GuardedAnswer::Results(doc.to_string()))),
            QueryForm::Ask => Ok(strip_rows(body)?.map(|doc| {
                let answer = doc
                    .pointer("/results/bindings")
                    .and_then(Value::as_array)
                    .is_some_and(|rows| rows.iter().any(|row| row.get(ASK_VAR).is_some()));
                GuardedAnswer::Results(serde_json::json!({"head": {}, "boolean": answer}).to_string())
            })),
            QueryForm::Construct | QueryForm::Describe => {
                let triples = parse_ntriples(body)?;
                let (marked, data): (Vec<_>, Vec<_>) = triples.into_iter().partition(is_marker);
                Ok((!marked.is_empty()).then_some(GuardedAnswer::Graph(data)))
            }
        }
    }
}

fn is_marker(t: &Triple) -> bool {
    t.subject.as_iri() == Some(marker::AUTH) && t.predicate.as_iri() == Some(marker::AUTH_STATUS)
}

/// Remove the marker row and column; `None` if there was no marker row.
fn strip_rows(body: &str) -> Result<Option<Value>> {
    let mut doc: Value = serde_json::from_str(body)
        .map_err(|e| Error::Serialization(format!("invalid SPARQL results: {}", e)))?;
    let rows = doc
        .pointer_mut("/results/bindings")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| Error::Serialization("SPARQL results without bindings".into()))?;
    let before = rows.len();
    rows.retain(|row| row.pointer(&format!("/{}/value", AUTH_VAR)).and_then(Value::as_str) != Some(marker::PERMITTED));
    if rows.len() == before {
        return Ok(None);
    }
    if let Some(vars) = doc.pointer_mut("/head/vars").and_then(Value::as_array_mut) {
        vars.retain(|v| v.as_str() != Some(AUTH_VAR) && v.as_str() != Some(ASK_VAR));
    }
    Ok(Some(doc))
}

fn named_node(iri: &str) -> Result<NamedNode> {
    NamedNode::new(iri).map_err(|e| Error::Internal(format!("invalid graph IRI {}: {}", iri, e)))
}

fn var(name: &str) -> Variable {
    Variable::new_unchecked(name)
}

fn join(left: Algebra, right: Algebra) -> Algebra {
    Algebra::Join {
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn union(left: Algebra, right: Algebra) -> Algebra {
    Algebra::Union {
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn in_scope(pattern: &Algebra) -> Vec<Variable> {
    let mut out: Vec<Variable> = Vec::new();
    pattern.on_in_scope_variable(|v| {
        if !out.contains(v) {
            out.push(v.clone());
        }
    });
    out
}

fn has_variable(t: &Template) -> bool {
    matches!(t.subject, TermPattern::Variable(_))
        || matches!(t.predicate, NamedNodePattern::Variable(_))
        || matches!(t.object, TermPattern::Variable(_))
}

fn marker_template() -> Template {
    Template {
        subject: NamedNode::new_unchecked(marker::AUTH).into(),
        predicate: NamedNode::new_unchecked(marker::AUTH_STATUS).into(),
        object: var(AUTH_VAR).into(),
    }
}

/// The guard alone, as algebra.
fn guard_check(guard: &GraphPattern) -> Result<Algebra> {
    match Query::parse(&format!("ASK {}", guard), None) {
        Ok(Query::Ask { pattern, .. }) => Ok(pattern),
        Ok(_) => Err(Error::ServerBug("guard did not parse as ASK".into())),
        Err(e) => Err(Error::ServerBug(format!("unparsable guard: {}", e))),
    }
}

/// One solution binding [`AUTH_VAR`] iff the guard holds.
fn guard_marker(guard: &GraphPattern) -> Result<Algebra> {
    let text = format!(
        "SELECT ?{v} WHERE {{ {g} BIND(<{m}> AS ?{v}) }}",
        v = AUTH_VAR,
        g = guard,
        m = marker::PERMITTED
    );
    match Query::parse(&text, None) {
        Ok(Query::Select { pattern, .. }) => Ok(pattern),
        Ok(_) => Err(Error::ServerBug("guard marker did not parse as SELECT".into())),
        Err(e) => Err(Error::ServerBug(format!("unparsable guard marker: {}", e))),
    }
}
