//! Maintenance worker: runs FINALIZE tasks after responses are sent.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use mms_core::defaults::{EVENT_BUS_CAPACITY, MAINTENANCE_CONCURRENCY, MAINTENANCE_QUEUE_CAPACITY};
use mms_core::{Error, Result};
use mms_engine::{Engine, MaintenanceScheduler, MaintenanceTask};

/// Configuration for the maintenance worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of tasks running at once.
    pub max_concurrent_tasks: usize,
    /// Tasks buffered before new ones are dropped.
    pub queue_capacity: usize,
    /// Whether to run tasks at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: MAINTENANCE_CONCURRENCY,
            queue_capacity: MAINTENANCE_QUEUE_CAPACITY,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `MMS_MAINTENANCE_ENABLED` | `true` | Enable/disable task processing |
    /// | `MMS_MAINTENANCE_CONCURRENCY` | `4` | Max concurrent tasks |
    /// | `MMS_MAINTENANCE_QUEUE_CAPACITY` | `1024` | Buffered tasks |
    pub fn from_env() -> Self {
        let enabled = std::env::var("MMS_MAINTENANCE_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_tasks = std::env::var("MMS_MAINTENANCE_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(MAINTENANCE_CONCURRENCY)
            .max(1);

        let queue_capacity = std::env::var("MMS_MAINTENANCE_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(MAINTENANCE_QUEUE_CAPACITY)
            .max(1);

        Self {
            max_concurrent_tasks,
            queue_capacity,
            enabled,
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the maintenance worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    TaskStarted { task: &'static str },
    TaskCompleted { task: &'static str, duration_ms: u64 },
    TaskFailed { task: &'static str, error: String },
    WorkerStarted,
    WorkerStopped,
}

/// [`MaintenanceScheduler`] feeding a bounded queue.
///
/// Never blocks the request path: when the queue is full the task is
/// dropped with a warning, and the janitor or an on-demand rebuild picks
/// up the slack.
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    tx: mpsc::Sender<MaintenanceTask>,
}

impl MaintenanceScheduler for ChannelScheduler {
    fn schedule(&self, task: MaintenanceTask) {
        let name = task.name();
        match self.tx.try_send(task) {
            Ok(()) => debug!(subsystem = "jobs", task = name, "Maintenance task queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subsystem = "jobs", task = name, "Maintenance queue full, task dropped")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(subsystem = "jobs", task = name, "Maintenance worker stopped, task dropped")
            }
        }
    }
}

/// Receiving end of the maintenance queue.
#[derive(Debug)]
pub struct MaintenanceQueue {
    rx: mpsc::Receiver<MaintenanceTask>,
}

/// Create the queue shared by the engine (sending) and the worker (receiving).
pub fn maintenance_channel(capacity: usize) -> (ChannelScheduler, MaintenanceQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelScheduler { tx }, MaintenanceQueue { rx })
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down after its in-flight tasks.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Runs queued [`MaintenanceTask`]s against the engine.
pub struct MaintenanceWorker {
    engine: Arc<Engine>,
    queue: MaintenanceQueue,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl MaintenanceWorker {
    pub fn new(engine: Arc<Engine>, queue: MaintenanceQueue, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            engine,
            queue,
            config,
            event_tx,
        }
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        tokio::spawn(self.run(shutdown_rx));
        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    #[instrument(skip_all, fields(subsystem = "jobs", component = "maintenance_worker"))]
    async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Maintenance worker is disabled, not starting");
            return;
        }
        info!(
            max_concurrent = self.config.max_concurrent_tasks,
            queue_capacity = self.config.queue_capacity,
            "Maintenance worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_tasks));
        let mut running = JoinSet::new();

        loop {
            let task = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Maintenance worker received shutdown signal");
                    break;
                }
                task = self.queue.rx.recv() => match task {
                    Some(task) => task,
                    None => {
                        info!("Maintenance queue closed");
                        break;
                    }
                },
                Some(result) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = result {
                        error!(error = ?e, "Maintenance task panicked");
                    }
                    continue;
                }
            };

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let engine = self.engine.clone();
            let event_tx = self.event_tx.clone();
            running.spawn(async move {
                execute(&engine, &event_tx, task).await;
                drop(permit);
            });
        }

        while let Some(result) = running.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Maintenance task panicked");
            }
        }
        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Maintenance worker stopped");
    }
}

async fn execute(engine: &Engine, event_tx: &broadcast::Sender<WorkerEvent>, task: MaintenanceTask) {
    let name = task.name();
    let started = Instant::now();
    let _ = event_tx.send(WorkerEvent::TaskStarted { task: name });

    match engine.run_maintenance(&task).await {
        Ok(()) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            debug!(subsystem = "jobs", task = name, duration_ms, "Maintenance task completed");
            let _ = event_tx.send(WorkerEvent::TaskCompleted {
                task: name,
                duration_ms,
            });
        }
        Err(e) => {
            // the janitor or an on-demand rebuild covers for a failed task
            warn!(subsystem = "jobs", task = name, error = %e, "Maintenance task failed");
            let _ = event_tx.send(WorkerEvent::TaskFailed {
                task: name,
                error: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_tasks, MAINTENANCE_CONCURRENCY);
        assert_eq!(config.queue_capacity, MAINTENANCE_QUEUE_CAPACITY);
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_builder_clamps() {
        let config = WorkerConfig::default()
            .with_max_concurrent(0)
            .with_queue_capacity(0)
            .with_enabled(false);
        assert_eq!(config.max_concurrent_tasks, 1);
        assert_eq!(config.queue_capacity, 1);
        assert!(!config.enabled);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (scheduler, mut queue) = maintenance_channel(1);
        let task = || MaintenanceTask::DropGraphs {
            graphs: vec!["urn:g".into()],
        };
        scheduler.schedule(task());
        scheduler.schedule(task());
        assert_eq!(queue.rx.recv().await, Some(task()));
        assert!(queue.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_queue_is_tolerated() {
        let (scheduler, queue) = maintenance_channel(4);
        drop(queue);
        scheduler.schedule(MaintenanceTask::DeleteTransaction {
            transaction: "urn:txn".into(),
        });
    }
}
