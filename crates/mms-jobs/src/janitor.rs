//! Periodic cleanup of state a crashed or abandoned request left behind:
//! Transaction nodes and interim locks older than the configured TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use mms_core::defaults::{JANITOR_INTERVAL_SECS, TRANSACTION_TTL_SECS};
use mms_core::{Error, Result};
use mms_engine::Engine;

#[derive(Debug, Clone)]
pub struct JanitorConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Age after which a Transaction node or interim lock is considered
    /// abandoned.
    pub ttl_secs: i64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: JANITOR_INTERVAL_SECS,
            ttl_secs: TRANSACTION_TTL_SECS,
        }
    }
}

impl JanitorConfig {
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `MMS_JANITOR_ENABLED` | `true` | Enable/disable the sweep |
    /// | `MMS_JANITOR_INTERVAL_SECS` | `300` | Seconds between sweeps |
    /// | `MMS_TRANSACTION_TTL_SECS` | `3600` | Age of reaped state |
    pub fn from_env() -> Self {
        let enabled = std::env::var("MMS_JANITOR_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let interval_secs = std::env::var("MMS_JANITOR_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JANITOR_INTERVAL_SECS)
            .max(1);
        let ttl_secs = std::env::var("MMS_TRANSACTION_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(TRANSACTION_TTL_SECS);
        Self {
            enabled,
            interval_secs,
            ttl_secs,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs.max(1);
        self
    }

    pub fn with_ttl_secs(mut self, secs: i64) -> Self {
        self.ttl_secs = secs;
        self
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub found: usize,
    pub cleaned: usize,
}

pub struct Janitor {
    engine: Arc<Engine>,
    config: JanitorConfig,
}

pub struct JanitorHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl JanitorHandle {
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))
    }
}

impl Janitor {
    pub fn new(engine: Arc<Engine>, config: JanitorConfig) -> Self {
        Self { engine, config }
    }

    /// Reap everything older than the TTL once. Individual failures are
    /// logged and left for the next sweep.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "janitor"))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.ttl_secs);
        let tasks = self.engine.expired_maintenance(cutoff).await?;
        let mut report = SweepReport {
            found: tasks.len(),
            cleaned: 0,
        };
        for task in &tasks {
            match self.engine.run_maintenance(task).await {
                Ok(()) => report.cleaned += 1,
                Err(e) => warn!(task = task.name(), error = %e, "Janitor cleanup failed"),
            }
        }
        if report.found > 0 {
            info!(found = report.found, cleaned = report.cleaned, "Janitor sweep finished");
        } else {
            debug!("Janitor sweep found nothing");
        }
        Ok(report)
    }

    /// Sweep every `interval_secs` until shut down.
    pub fn start(self) -> JanitorHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            if !self.config.enabled {
                info!(subsystem = "jobs", "Janitor is disabled, not starting");
                return;
            }
            info!(
                subsystem = "jobs",
                interval_secs = self.config.interval_secs,
                ttl_secs = self.config.ttl_secs,
                "Janitor started"
            );
            let mut ticks = interval(Duration::from_secs(self.config.interval_secs));
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticks.tick() => {
                        if let Err(e) = self.sweep().await {
                            warn!(subsystem = "jobs", error = %e, "Janitor sweep failed");
                        }
                    }
                }
            }
            info!(subsystem = "jobs", "Janitor stopped");
        });
        JanitorHandle { shutdown_tx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_janitor_config_default() {
        let config = JanitorConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval_secs, JANITOR_INTERVAL_SECS);
        assert_eq!(config.ttl_secs, TRANSACTION_TTL_SECS);
    }

    #[test]
    fn test_janitor_config_builder() {
        let config = JanitorConfig::default()
            .with_enabled(false)
            .with_interval_secs(0)
            .with_ttl_secs(60);
        assert!(!config.enabled);
        assert_eq!(config.interval_secs, 1);
        assert_eq!(config.ttl_secs, 60);
    }
}
