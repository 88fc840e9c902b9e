//! SPARQL request ASTs: UPDATE, CONSTRUCT and SELECT.
//!
//! Requests are assembled from typed [`Term`]s and [`GraphPattern`]s and only
//! turned into text by `Display`, which is the single place query strings
//! are produced.

use std::fmt::{self, Write as _};

use crate::pattern::{GraphPattern, TriplePattern};
use crate::term::Term;

/// Quads for one named graph inside an update template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphTemplate {
    pub graph: Term,
    pub triples: Vec<TriplePattern>,
    /// Pre-rendered triple text produced by the SPARQL parser.
    pub verbatim: Vec<String>,
}

impl GraphTemplate {
    pub fn new(graph: impl Into<Term>, triples: Vec<TriplePattern>) -> Self {
        Self {
            graph: graph.into(),
            triples,
            verbatim: Vec::new(),
        }
    }

    pub fn verbatim(graph: impl Into<Term>, lines: Vec<String>) -> Self {
        Self {
            graph: graph.into(),
            triples: Vec::new(),
            verbatim: lines,
        }
    }

    fn is_empty(&self) -> bool {
        self.triples.is_empty() && self.verbatim.is_empty()
    }

    fn write(&self, out: &mut String) {
        let _ = writeln!(out, "GRAPH {} {{", self.graph);
        for t in &self.triples {
            let _ = writeln!(out, "{}", t);
        }
        for line in &self.verbatim {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("}\n");
    }
}

fn write_templates(out: &mut String, templates: &[GraphTemplate]) {
    out.push_str("{\n");
    for t in templates.iter().filter(|t| !t.is_empty()) {
        t.write(out);
    }
    out.push_str("}\n");
}

/// One operation of an update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOperation {
    InsertData(Vec<GraphTemplate>),
    DeleteData(Vec<GraphTemplate>),
    /// `DELETE { .. } INSERT { .. } WHERE { .. }`
    Modify {
        delete: Vec<GraphTemplate>,
        insert: Vec<GraphTemplate>,
        pattern: GraphPattern,
    },
    Drop {
        graph: Term,
        silent: bool,
    },
    Load {
        source: Term,
        graph: Term,
        silent: bool,
    },
}

impl UpdateOperation {
    pub fn modify(
        delete: Vec<GraphTemplate>,
        insert: Vec<GraphTemplate>,
        pattern: GraphPattern,
    ) -> Self {
        UpdateOperation::Modify {
            delete,
            insert,
            pattern,
        }
    }

    pub fn drop_silent(graph: impl Into<Term>) -> Self {
        UpdateOperation::Drop {
            graph: graph.into(),
            silent: true,
        }
    }

    /// `INSERT { GRAPH dst { ?s ?p ?o } } WHERE { GRAPH src { ?s ?p ?o } }`
    /// restricted by `guard`.
    ///
    /// Unlike `COPY`, the copy only happens when `guard` matches, which lets
    /// it ride in the same request as a guarded write.
    pub fn copy_graph_when(src: impl Into<Term>, dst: impl Into<Term>, guard: GraphPattern) -> Self {
        let (s, p, o) = (Term::var("__s"), Term::var("__p"), Term::var("__o"));
        let spo = TriplePattern::new(s.clone(), p.clone(), o.clone());
        UpdateOperation::Modify {
            delete: Vec::new(),
            insert: vec![GraphTemplate::new(dst, vec![spo.clone()])],
            pattern: guard.and(GraphPattern::graph(src, GraphPattern::Triples(vec![spo]))),
        }
    }

    fn write(&self, out: &mut String) {
        match self {
            UpdateOperation::InsertData(templates) => {
                out.push_str("INSERT DATA ");
                write_templates(out, templates);
            }
            UpdateOperation::DeleteData(templates) => {
                out.push_str("DELETE DATA ");
                write_templates(out, templates);
            }
            UpdateOperation::Modify {
                delete,
                insert,
                pattern,
            } => {
                let has_delete = delete.iter().any(|t| !t.is_empty());
                let has_insert = insert.iter().any(|t| !t.is_empty());
                if has_delete {
                    out.push_str("DELETE ");
                    write_templates(out, delete);
                }
                if has_insert || !has_delete {
                    out.push_str("INSERT ");
                    write_templates(out, insert);
                }
                let _ = write!(out, "WHERE {}", pattern);
            }
            UpdateOperation::Drop { graph, silent } => {
                let _ = writeln!(
                    out,
                    "DROP {}GRAPH {}",
                    if *silent { "SILENT " } else { "" },
                    graph
                );
            }
            UpdateOperation::Load {
                source,
                graph,
                silent,
            } => {
                let _ = writeln!(
                    out,
                    "LOAD {}{} INTO GRAPH {}",
                    if *silent { "SILENT " } else { "" },
                    source,
                    graph
                );
            }
        }
    }
}

/// A SPARQL update request: operations executed atomically, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateRequest {
    pub operations: Vec<UpdateOperation>,
}

impl UpdateRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, op: UpdateOperation) -> Self {
        self.operations.push(op);
        self
    }

    pub fn extend(mut self, ops: impl IntoIterator<Item = UpdateOperation>) -> Self {
        self.operations.extend(ops);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl fmt::Display for UpdateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for (i, op) in self.operations.iter().enumerate() {
            if i > 0 {
                out.push_str(";\n");
            }
            op.write(&mut out);
        }
        f.write_str(&out)
    }
}

/// `CONSTRUCT { template } WHERE { pattern }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructQuery {
    pub template: Vec<TriplePattern>,
    pub pattern: GraphPattern,
}

impl ConstructQuery {
    pub fn new(template: Vec<TriplePattern>, pattern: GraphPattern) -> Self {
        Self { template, pattern }
    }
}

impl fmt::Display for ConstructQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CONSTRUCT {\n")?;
        for t in &self.template {
            writeln!(f, "{}", t)?;
        }
        write!(f, "}}\nWHERE {}", self.pattern)
    }
}

/// `SELECT [DISTINCT] ?vars WHERE { pattern } [ORDER BY] [LIMIT]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    pub distinct: bool,
    pub variables: Vec<String>,
    pub pattern: GraphPattern,
    pub order_by: Vec<String>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn new<I, S>(variables: I, pattern: GraphPattern) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            distinct: false,
            variables: variables.into_iter().map(Into::into).collect(),
            pattern,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn order_by(mut self, var: impl Into<String>) -> Self {
        self.order_by.push(var.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl fmt::Display for SelectQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        if self.variables.is_empty() {
            f.write_str("*")?;
        }
        for v in &self.variables {
            write!(f, "{} ", Term::var(v.as_str()))?;
        }
        write!(f, "\nWHERE {}", self.pattern)?;
        if !self.order_by.is_empty() {
            f.write_str("ORDER BY")?;
            for v in &self.order_by {
                write!(f, " {}", Term::var(v.as_str()))?;
            }
            f.write_str("\n")?;
        }
        if let Some(limit) = self.limit {
            writeln!(f, "LIMIT {}", limit)?;
        }
        Ok(())
    }
}
