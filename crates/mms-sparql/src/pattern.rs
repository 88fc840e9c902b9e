//! Graph patterns and filter expressions.

use std::fmt::{self, Write as _};

use crate::term::{write_iri, Term};

/// A triple pattern; any position may be a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl TriplePattern {
    pub fn new(subject: impl Into<Term>, predicate: impl Into<Term>, object: impl Into<Term>) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

/// Shorthand for [`TriplePattern::new`].
pub fn tp(subject: impl Into<Term>, predicate: impl Into<Term>, object: impl Into<Term>) -> TriplePattern {
    TriplePattern::new(subject, predicate, object)
}

/// Property path over a single predicate IRI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyPath {
    ZeroOrMore(String),
    OneOrMore(String),
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyPath::ZeroOrMore(iri) => {
                write_iri(f, iri)?;
                f.write_char('*')
            }
            PropertyPath::OneOrMore(iri) => {
                write_iri(f, iri)?;
                f.write_char('+')
            }
        }
    }
}

/// Filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Eq(Term, Term),
    NotEq(Term, Term),
    Lt(Term, Term),
    In(Term, Vec<Term>),
    /// `STRSTARTS(STR(term), "prefix")`
    StrStarts(Term, String),
    Bound(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Eq(a, b) => write!(f, "({} = {})", a, b),
            Expr::NotEq(a, b) => write!(f, "({} != {})", a, b),
            Expr::Lt(a, b) => write!(f, "({} < {})", a, b),
            Expr::In(a, values) => {
                // `x IN ()` is valid and always false
                write!(f, "({} IN (", a)?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("))")
            }
            Expr::StrStarts(a, prefix) => {
                write!(f, "STRSTARTS(STR({}), {})", a, Term::literal(prefix.as_str()))
            }
            Expr::Bound(var) => write!(f, "BOUND({})", Term::var(var.as_str())),
            Expr::Not(inner) => write!(f, "(!{})", inner),
            Expr::And(a, b) => write!(f, "({} && {})", a, b),
            Expr::Or(a, b) => write!(f, "({} || {})", a, b),
        }
    }
}

/// A SPARQL group graph pattern element.
///
/// `Group` renders its members without extra braces when it is the body of
/// an enclosing construct, so nesting groups never changes filter scope
/// unless a group is used as a member of another group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphPattern {
    Triples(Vec<TriplePattern>),
    Path {
        subject: Term,
        path: PropertyPath,
        object: Term,
    },
    Graph {
        name: Term,
        inner: Box<GraphPattern>,
    },
    Group(Vec<GraphPattern>),
    Union(Vec<GraphPattern>),
    Optional(Box<GraphPattern>),
    Exists(Box<GraphPattern>),
    NotExists(Box<GraphPattern>),
    Filter(Expr),
    Bind {
        value: Term,
        var: String,
    },
    Values {
        var: String,
        values: Vec<Term>,
    },
    /// Pattern text produced by the SPARQL parser from validated user input.
    Verbatim(String),
}

impl Default for GraphPattern {
    fn default() -> Self {
        GraphPattern::empty()
    }
}

impl GraphPattern {
    pub fn empty() -> Self {
        GraphPattern::Group(Vec::new())
    }

    pub fn triples(patterns: impl IntoIterator<Item = TriplePattern>) -> Self {
        GraphPattern::Triples(patterns.into_iter().collect())
    }

    pub fn graph(name: impl Into<Term>, inner: GraphPattern) -> Self {
        GraphPattern::Graph {
            name: name.into(),
            inner: Box::new(inner),
        }
    }

    pub fn optional(inner: GraphPattern) -> Self {
        GraphPattern::Optional(Box::new(inner))
    }

    pub fn exists(inner: GraphPattern) -> Self {
        GraphPattern::Exists(Box::new(inner))
    }

    pub fn not_exists(inner: GraphPattern) -> Self {
        GraphPattern::NotExists(Box::new(inner))
    }

    pub fn bind(value: impl Into<Term>, var: impl Into<String>) -> Self {
        GraphPattern::Bind {
            value: value.into(),
            var: var.into(),
        }
    }

    pub fn values(var: impl Into<String>, values: Vec<Term>) -> Self {
        GraphPattern::Values {
            var: var.into(),
            values,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            GraphPattern::Group(items) => items.iter().all(GraphPattern::is_empty),
            GraphPattern::Triples(t) => t.is_empty(),
            _ => false,
        }
    }

    /// Conjunction of `self` and `other`, flattening groups.
    pub fn and(self, other: GraphPattern) -> GraphPattern {
        let mut items = match self {
            GraphPattern::Group(items) => items,
            other => vec![other],
        };
        match other {
            GraphPattern::Group(more) => items.extend(more),
            other => items.push(other),
        }
        GraphPattern::Group(items)
    }

    /// Render the members of this pattern as the inside of `{ ... }`.
    pub fn write_body(&self, out: &mut String) {
        match self {
            GraphPattern::Group(items) => {
                for item in items {
                    if !item.is_empty() {
                        item.write_element(out);
                    }
                }
            }
            other => other.write_element(out),
        }
    }

    fn write_braced(&self, out: &mut String) {
        out.push_str("{\n");
        self.write_body(out);
        out.push_str("}\n");
    }

    fn write_element(&self, out: &mut String) {
        match self {
            GraphPattern::Triples(triples) => {
                for t in triples {
                    let _ = writeln!(out, "{}", t);
                }
            }
            GraphPattern::Path {
                subject,
                path,
                object,
            } => {
                let _ = writeln!(out, "{} {} {} .", subject, path, object);
            }
            GraphPattern::Graph { name, inner } => {
                let _ = write!(out, "GRAPH {} ", name);
                inner.write_braced(out);
            }
            GraphPattern::Group(_) => self.write_braced(out),
            GraphPattern::Union(branches) => {
                if branches.is_empty() {
                    // an empty union matches nothing
                    out.push_str("FILTER(false)\n");
                    return;
                }
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        out.push_str("UNION\n");
                    }
                    branch.write_braced(out);
                }
            }
            GraphPattern::Optional(inner) => {
                out.push_str("OPTIONAL ");
                inner.write_braced(out);
            }
            GraphPattern::Exists(inner) => {
                out.push_str("FILTER EXISTS ");
                inner.write_braced(out);
            }
            GraphPattern::NotExists(inner) => {
                out.push_str("FILTER NOT EXISTS ");
                inner.write_braced(out);
            }
            GraphPattern::Filter(expr) => {
                let _ = writeln!(out, "FILTER({})", expr);
            }
            GraphPattern::Bind { value, var } => {
                let _ = writeln!(out, "BIND({} AS {})", value, Term::var(var.as_str()));
            }
            GraphPattern::Values { var, values } => {
                let _ = write!(out, "VALUES {} {{", Term::var(var.as_str()));
                for v in values {
                    let _ = write!(out, " {}", v);
                }
                out.push_str(" }\n");
            }
            GraphPattern::Verbatim(text) => {
                out.push_str(text);
                out.push('\n');
            }
        }
    }
}

/// Renders the pattern as a braced group.
impl fmt::Display for GraphPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_braced(&mut out);
        f.write_str(&out)
    }
}
