//! # mms-sparql
//!
//! Typed SPARQL construction and RDF I/O for the mms layer.
//!
//! - [`term`] / [`pattern`] / [`builder`]: an AST for the queries and updates
//!   the layer issues, rendered with escaping so values never splice into
//!   query text
//! - [`rdf`]: Turtle and N-Triples parsing and serialization
//! - [`results`]: SPARQL JSON results decoding
//! - [`parse`]: validation and rewriting of client-submitted SPARQL
//! - [`sanitize`]: client queries rewritten to carry an access check

pub mod builder;
pub mod parse;
pub mod pattern;
pub mod rdf;
pub mod results;
pub mod sanitize;
pub mod term;

pub use builder::{ConstructQuery, GraphTemplate, SelectQuery, UpdateOperation, UpdateRequest};
pub use parse::{Patch, PatchOperation, QueryForm};
pub use pattern::{tp, Expr, GraphPattern, PropertyPath, TriplePattern};
pub use rdf::RdfFormat;
pub use results::{Solution, Solutions};
pub use sanitize::{ClientQuery, GuardedAnswer, GuardedQuery};
pub use term::{Literal, Term, Triple};
