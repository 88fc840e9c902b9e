//! Structured logging schema and field name constants for mms.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Server bugs, failed maintenance, requires operator attention |
//! | WARN  | Recoverable issue, condition failures surfaced to clients |
//! | INFO  | Lifecycle events (startup, shutdown), completed mutations |
//! | DEBUG | Transaction phases, resolved graphs, config choices |
//! | TRACE | Full SPARQL request text |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated from the HTTP layer. Format: UUIDv7.
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "engine", "store", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "transaction", "sanitizer", "diff", "janitor", "http_store"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "attempt", "validate", "create_branch", "materialize"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Transaction id of the in-flight mutation (also the resulting ETag).
pub const TRANSACTION_ID: &str = "transaction_id";

/// Organization id.
pub const ORG_ID: &str = "org_id";

/// Repository id.
pub const REPO_ID: &str = "repo_id";

/// Branch or lock id.
pub const REF_ID: &str = "ref_id";

/// Commit IRI.
pub const COMMIT: &str = "commit";

/// Named graph IRI.
pub const GRAPH: &str = "graph";

/// Authenticated subject.
pub const USER: &str = "user";

/// Name of a failed condition.
pub const CONDITION: &str = "condition";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of triples in a response or graph.
pub const TRIPLE_COUNT: &str = "triple_count";

/// Byte length of a SPARQL request body.
pub const REQUEST_LEN: &str = "request_len";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";
