//! Centralized default constants for the mms layer.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic numbers.

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 8080;

/// Default bind host.
pub const SERVER_HOST: &str = "0.0.0.0";

/// Maximum accepted request body (model uploads can be large).
pub const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

// =============================================================================
// ENGINE
// =============================================================================

/// Root IRI under which every resource, graph and policy is minted.
pub const ROOT_CONTEXT: &str = "http://layer1.mms.local";

/// Hide resource existence from unauthorized callers (404 instead of 403).
pub const GLOMAR: bool = true;

/// Materialize a Model snapshot for every new commit during FINALIZE.
pub const MATERIALIZE_COMMITS: bool = true;

/// Groups granted AdminCluster at bootstrap.
pub const ROOT_GROUPS: &str = "super_admins";

/// Name of the branch created with every repository.
pub const DEFAULT_BRANCH: &str = "master";

/// Maximum identifier length for orgs, repos, branches and locks.
pub const ID_MAX_LEN: usize = 128;

// =============================================================================
// STORE
// =============================================================================

/// Default SPARQL query endpoint.
pub const STORE_QUERY_URL: &str = "http://localhost:7200/sparql";

/// Default SPARQL update endpoint.
pub const STORE_UPDATE_URL: &str = "http://localhost:7200/sparql";

/// Timeout for ordinary store calls (seconds).
pub const STORE_TIMEOUT_SECS: u64 = 60;

/// Timeout for bulk loads and graph copies (seconds).
pub const STORE_BULK_TIMEOUT_SECS: u64 = 30 * 60;

/// Store calls slower than this are logged with `slow = true` (milliseconds).
pub const STORE_SLOW_MS: u64 = 5_000;

// =============================================================================
// JOBS
// =============================================================================

/// Maximum concurrent maintenance tasks.
pub const MAINTENANCE_CONCURRENCY: usize = 4;

/// Capacity of the maintenance task queue.
pub const MAINTENANCE_QUEUE_CAPACITY: usize = 1024;

/// Janitor sweep interval (seconds).
pub const JANITOR_INTERVAL_SECS: u64 = 300;

/// Age after which an undeleted Transaction node is considered orphaned (seconds).
pub const TRANSACTION_TTL_SECS: i64 = 3600;

/// Capacity of worker event broadcast channels.
pub const EVENT_BUS_CAPACITY: usize = 256;
