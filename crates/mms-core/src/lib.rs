//! # mms-core
//!
//! Core types, vocabulary and abstractions for the mms version-control layer.
//!
//! This crate provides the foundational pieces every other mms crate depends
//! on: the error taxonomy, structured-logging field names, resource
//! addressing, the static permission model, and the collaborator traits for
//! the backing SPARQL store.

pub mod defaults;
pub mod error;
pub mod ids;
pub mod logging;
pub mod permissions;
pub mod resources;
pub mod traits;
pub mod vocab;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use ids::{new_resource_id, new_transaction_id, validate_id};
pub use permissions::{
    check_permission, Action, Permission, Policy, Role, RoleLevel, ScopeType, Subject,
};
pub use resources::{IriFactory, RefAddress, RefKind, RepoAddress};
pub use traits::{LoadService, SparqlStore, StoreResponse, N_TRIPLES, SPARQL_RESULTS_JSON};
