//! # mms-engine
//!
//! Git-style version control over a SPARQL triplestore.
//!
//! The store offers one atomic primitive, a single UPDATE request. Every
//! mutation here is built as one guarded update whose WHERE clause carries
//! its permission check and preconditions, then verified by reading back
//! the Transaction node it inserts:
//!
//! - [`transaction`]: BUILD / ATTEMPT / VALIDATE / FINALIZE
//! - [`conditions`]: named guard patterns and failure diagnosis
//! - [`access`]: inline permission patterns and auto-granted policies
//! - orgs, repos, branches, locks, commits: the version graph
//! - [`snapshots`], [`diff`], [`load`]: model materialization and diffs
//! - [`query`]: graph-scoped client queries
//! - [`maintenance`]: work deferred past the response
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mms_engine::{Engine, EngineConfig, RequestContext, RdfBody, Preconditions};
//!
//! let engine = Engine::new(store, scheduler, EngineConfig::from_env());
//! engine.bootstrap().await?;
//!
//! let ctx = RequestContext::new(engine.iris(), "alice", &[]);
//! let org = engine
//!     .put_org(&ctx, "acme", &RdfBody::turtle("<> dct:title \"Acme\" ."), &Preconditions::none())
//!     .await?;
//! println!("etag {}", org.etag());
//! ```

pub mod access;
pub mod body;
pub mod bootstrap;
pub mod branches;
pub mod commits;
pub mod conditions;
pub mod config;
pub mod context;
pub mod diff;
pub mod engine;
pub mod guards;
pub mod load;
pub mod locks;
pub mod maintenance;
pub mod orgs;
pub mod query;
pub mod reads;
pub mod refs;
pub mod repos;
pub mod snapshots;
pub mod testing;
pub mod transaction;

// Re-export core types
pub use mms_core::*;

pub use body::{Description, RdfBody};
pub use conditions::{Condition, ConditionsGroup, FailureKind};
pub use config::EngineConfig;
pub use context::RequestContext;
pub use diff::{diff_id, DiffSide};
pub use engine::Engine;
pub use guards::Preconditions;
pub use maintenance::{MaintenanceScheduler, MaintenanceTask};
pub use query::default_accept;
pub use reads::{Mutation, Resource};
pub use refs::{RefState, Source};
pub use transaction::{TransactionOutcome, TransactionPlan};
