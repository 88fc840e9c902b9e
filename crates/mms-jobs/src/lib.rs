//! # mms-jobs
//!
//! Background work for the mms layer.
//!
//! - [`MaintenanceWorker`]: runs the tasks FINALIZE schedules (transaction
//!   node removal, commit materialization, interim lock and graph cleanup)
//!   with bounded concurrency
//! - [`Janitor`]: periodically reaps Transaction nodes and interim locks a
//!   crashed request left behind
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mms_jobs::{maintenance_channel, MaintenanceWorker, WorkerConfig};
//!
//! let config = WorkerConfig::from_env();
//! let (scheduler, queue) = maintenance_channel(config.queue_capacity);
//! let engine = Arc::new(Engine::new(store, Arc::new(scheduler), EngineConfig::from_env()));
//! let handle = MaintenanceWorker::new(engine.clone(), queue, config).start();
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod janitor;
pub mod worker;

pub use janitor::{Janitor, JanitorConfig, JanitorHandle, SweepReport};
pub use worker::{
    maintenance_channel, ChannelScheduler, MaintenanceQueue, MaintenanceWorker, WorkerConfig, WorkerEvent,
    WorkerHandle,
};
