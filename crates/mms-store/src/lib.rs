//! # mms-store
//!
//! Adapters for the collaborators the mms layer talks to:
//!
//! - [`HttpSparqlStore`]: any SPARQL 1.1 Query/Update endpoint
//! - [`MemorySparqlStore`]: an embedded in-memory store
//! - [`HttpLoadService`]: a service that stages uploaded documents at a URL
//!   the store can `LOAD` from

pub mod client;
pub mod config;
pub mod load;
pub mod memory;

pub use client::HttpSparqlStore;
pub use config::StoreConfig;
pub use load::HttpLoadService;
pub use memory::MemorySparqlStore;
