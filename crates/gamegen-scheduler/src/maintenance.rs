//! Periodic housekeeping: finished execution units and old jobs.

use gamegen_core::executor::Executor;
use gamegen_db::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub units_removed: usize,
    pub jobs_deleted: u64,
}

pub struct Maintenance {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn Executor>,
    retention_days: Option<u32>,
    interval: Duration,
}

impl Maintenance {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

    /// Old jobs are only deleted when `retention_days` is set.
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn Executor>,
        retention_days: Option<u32>,
    ) -> Self {
        Self {
            store,
            executor,
            retention_days,
            interval: Self::DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One pass. Failures are logged and counted as nothing removed.
    pub async fn run_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.executor.cleanup_finished().await {
            Ok(removed) => report.units_removed = removed,
            Err(e) => warn!(executor = self.executor.name(), error = %e, "Unit cleanup failed"),
        }

        if let Some(days) = self.retention_days {
            match self.store.cleanup_old(days).await {
                Ok(deleted) => report.jobs_deleted = deleted,
                Err(e) => warn!(days, error = %e, "Job retention cleanup failed"),
            }
        }

        if report != MaintenanceReport::default() {
            info!(
                units_removed = report.units_removed,
                jobs_deleted = report.jobs_deleted,
                "Maintenance pass finished"
            );
        }
        report
    }

    /// Run a pass every interval until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
