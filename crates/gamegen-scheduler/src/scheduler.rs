//! Scheduler tick loop.

use gamegen_core::JobStatus;
use gamegen_db::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::orchestrator::PipelineOrchestrator;
use crate::pool::WorkerPool;

/// Claims queued jobs on a fixed tick and runs them in a [`WorkerPool`].
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    orchestrator: Arc<PipelineOrchestrator>,
    pool: WorkerPool,
    poll_interval: Duration,
}

impl Scheduler {
    /// Capacity and tick interval come from the orchestrator's config.
    pub fn new(store: Arc<dyn JobStore>, orchestrator: Arc<PipelineOrchestrator>) -> Self {
        let config = orchestrator.config();
        let pool = WorkerPool::new(config.max_concurrent);
        let poll_interval = config.poll_interval;
        Self {
            store,
            orchestrator,
            pool,
            poll_interval,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Start at most one job. Returns its task handle if one was claimed.
    ///
    /// A slot is reserved before claiming so a claimed job never waits for
    /// capacity.
    pub async fn tick(&self) -> Option<JoinHandle<JobStatus>> {
        let slot = self.pool.try_acquire()?;

        let job = match self.store.get_next_job().await {
            Ok(Some(job)) => job,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to claim job");
                return None;
            }
        };

        info!(
            job_id = %job.id,
            in_flight = self.pool.in_flight(),
            capacity = self.pool.capacity(),
            "Claimed job"
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        Some(self.pool.spawn(slot, async move { orchestrator.run(job).await }))
    }

    /// Tick until `shutdown` turns true or its sender is dropped.
    ///
    /// Jobs already started keep running; use [`WorkerPool::wait_idle`] to
    /// wait for them.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_concurrent = self.pool.capacity(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting scheduler"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = self.pool.in_flight(), "Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDeployer, FakeExecutor, FakeOracle, Harness, fast_config};
    use gamegen_config::SchedulerConfig;
    use gamegen_core::JobConfig;

    fn scheduler(h: &Harness) -> Scheduler {
        Scheduler::new(h.store.clone(), h.orchestrator.clone())
    }

    #[tokio::test]
    async fn test_tick_respects_capacity() {
        let h = Harness::with_config(
            FakeExecutor::new(),
            FakeDeployer::new(),
            FakeOracle::scores(&[9.0]),
            SchedulerConfig {
                max_concurrent: 1,
                ..fast_config()
            },
        );
        let ids = h.store.add_job(2, &JobConfig::default()).await.unwrap();
        let scheduler = scheduler(&h);

        let first = scheduler.tick().await.unwrap();
        assert_eq!(scheduler.pool().in_flight(), 1);
        assert!(scheduler.tick().await.is_none());
        let second = h.store.get_job(ids[1]).await.unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Queued);

        assert_eq!(first.await.unwrap(), JobStatus::Completed);
        assert_eq!(scheduler.pool().in_flight(), 0);

        let next = scheduler.tick().await.unwrap();
        assert_eq!(next.await.unwrap(), JobStatus::Completed);
        let second = h.store.get_job(ids[1]).await.unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_tick_starts_one_job_per_tick() {
        let h = Harness::new(FakeExecutor::new(), FakeDeployer::new(), FakeOracle::scores(&[9.0]));
        h.store.add_job(2, &JobConfig::default()).await.unwrap();
        let scheduler = scheduler(&h);

        let handle = scheduler.tick().await.unwrap();
        let stats = h.store.get_stats().await.unwrap();
        assert_eq!(stats.queued, 1);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_queue_releases_slot() {
        let h = Harness::new(FakeExecutor::new(), FakeDeployer::new(), FakeOracle::scores(&[9.0]));
        let scheduler = scheduler(&h);

        assert!(scheduler.tick().await.is_none());
        assert_eq!(scheduler.pool().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failed_job_releases_slot() {
        let h = Harness::with_config(
            FakeExecutor::new().exit_with(gamegen_core::Phase::Phase1, 3),
            FakeDeployer::new(),
            FakeOracle::scores(&[9.0]),
            SchedulerConfig {
                max_concurrent: 1,
                ..fast_config()
            },
        );
        h.store.add_job(1, &JobConfig::default()).await.unwrap();
        let scheduler = scheduler(&h);

        let handle = scheduler.tick().await.unwrap();
        assert_eq!(handle.await.unwrap(), JobStatus::Failed);
        assert_eq!(scheduler.pool().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_run_drains_queue_until_shutdown() {
        let h = Harness::new(FakeExecutor::new(), FakeDeployer::new(), FakeOracle::scores(&[9.0]));
        h.store.add_job(3, &JobConfig::default()).await.unwrap();
        let scheduler = Arc::new(scheduler(&h));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run(shutdown_rx).await })
        };

        let store = h.store.clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            loop {
                let stats = store.get_stats().await.unwrap();
                if stats.completed == 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
        scheduler.pool().wait_idle().await;
        assert_eq!(scheduler.pool().in_flight(), 0);
    }
}
