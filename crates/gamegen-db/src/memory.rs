//! In-memory job store.
//!
//! Same contract as the PostgreSQL store, held behind a single async mutex.
//! Used by the server's `--memory` mode and throughout the test suites.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use gamegen_core::{
    Job, JobConfig, JobFilter, JobId, JobLogEntry, JobStats, JobStatus, LogLevel, PhaseOutputs,
};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::{DbError, DbResult, JobStore};

#[derive(Debug, Default)]
struct State {
    next_job_id: i64,
    next_log_id: i64,
    jobs: BTreeMap<JobId, Job>,
    logs: Vec<JobLogEntry>,
}

/// JobStore kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    state: Mutex<State>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn add_job(&self, count: u32, config: &JobConfig) -> DbResult<Vec<JobId>> {
        let mut state = self.state.lock().await;
        let mut ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            state.next_job_id += 1;
            let id = JobId::new(state.next_job_id);
            let now = Utc::now();
            state.jobs.insert(
                id,
                Job {
                    id,
                    status: JobStatus::Queued,
                    game_name: None,
                    config: config.clone(),
                    phase_outputs: PhaseOutputs::new(),
                    error: None,
                    created_at: now,
                    updated_at: now,
                    started_at: None,
                    completed_at: None,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_next_job(&self) -> DbResult<Option<Job>> {
        let mut state = self.state.lock().await;
        let next = state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Queued)
            .min_by_key(|job| (job.created_at, job.id))
            .map(|job| job.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        let now = Utc::now();
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<&str>,
    ) -> DbResult<Job> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| DbError::job_not_found(id))?;

        let now = Utc::now();
        job.status = status;
        job.updated_at = now;
        if status == JobStatus::Running && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        job.completed_at = status.is_terminal().then_some(now);
        if let (JobStatus::Failed, Some(error)) = (status, error) {
            job.error = Some(error.to_string());
        }
        Ok(job.clone())
    }

    async fn update_phase_output(&self, id: JobId, key: &str, value: Value) -> DbResult<Job> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| DbError::job_not_found(id))?;
        job.phase_outputs.merge(key, value);
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn get_job(&self, id: JobId) -> DbResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn get_jobs(&self, filter: &JobFilter) -> DbResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| filter.status.is_none_or(|status| job.status == status))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let offset = usize::try_from(filter.offset).unwrap_or(0);
        let limit = usize::try_from(filter.limit).unwrap_or(0);
        Ok(jobs.into_iter().skip(offset).take(limit).collect())
    }

    async fn add_log(&self, id: JobId, level: LogLevel, message: &str) -> DbResult<()> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(&id) {
            return Err(DbError::job_not_found(id));
        }
        state.next_log_id += 1;
        let entry = JobLogEntry {
            id: state.next_log_id,
            job_id: id,
            level,
            message: message.to_string(),
            created_at: Utc::now(),
        };
        state.logs.push(entry);
        Ok(())
    }

    async fn get_job_logs(&self, id: JobId) -> DbResult<Vec<JobLogEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .logs
            .iter()
            .filter(|entry| entry.job_id == id)
            .cloned()
            .collect())
    }

    async fn cleanup_old(&self, days_old: u32) -> DbResult<u64> {
        // A cutoff before the earliest representable time matches nothing.
        let Some(cutoff) = Utc::now().checked_sub_signed(Duration::days(i64::from(days_old))) else {
            return Ok(0);
        };
        let mut state = self.state.lock().await;

        let expired: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| job.created_at < cutoff)
            .map(|job| job.id)
            .collect();

        state.logs.retain(|entry| !expired.contains(&entry.job_id));
        for id in &expired {
            state.jobs.remove(id);
        }
        Ok(expired.len() as u64)
    }

    async fn get_stats(&self) -> DbResult<JobStats> {
        let state = self.state.lock().await;
        let mut stats = JobStats::default();
        for job in state.jobs.values() {
            stats.add(Some(job.status), 1);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn backdate(store: &MemoryJobStore, id: JobId, days: i64) {
        let mut state = store.state.lock().await;
        let job = state.jobs.get_mut(&id).unwrap();
        job.created_at = Utc::now() - Duration::days(days);
    }

    #[tokio::test]
    async fn test_add_job_creates_queued_jobs() {
        let store = MemoryJobStore::new();
        let config = JobConfig {
            model: Some("m".into()),
            ..Default::default()
        };
        let ids = store.add_job(3, &config).await.unwrap();
        assert_eq!(ids.len(), 3);

        for id in ids {
            let job = store.get_job(id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Queued);
            assert!(job.phase_outputs.is_empty());
            assert_eq!(job.config.model.as_deref(), Some("m"));
            assert!(job.started_at.is_none());
        }
    }

    #[tokio::test]
    async fn test_claims_follow_creation_order() {
        let store = MemoryJobStore::new();
        let ids = store.add_job(3, &JobConfig::default()).await.unwrap();

        for expected in &ids {
            let job = store.get_next_job().await.unwrap().unwrap();
            assert_eq!(job.id, *expected);
            assert_eq!(job.status, JobStatus::Running);
            assert!(job.started_at.is_some());
        }
        assert!(store.get_next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_exclusive() {
        let store = Arc::new(MemoryJobStore::new());
        store.add_job(4, &JobConfig::default()).await.unwrap();

        let claims = join_all((0..10).map(|_| {
            let store = store.clone();
            async move { store.get_next_job().await.unwrap() }
        }))
        .await;

        let claimed: Vec<JobId> = claims.into_iter().flatten().map(|job| job.id).collect();
        let unique: HashSet<_> = claimed.iter().copied().collect();
        assert_eq!(claimed.len(), 4);
        assert_eq!(unique.len(), 4);
    }

    #[tokio::test]
    async fn test_phase_output_merge_keeps_other_keys() {
        let store = MemoryJobStore::new();
        let id = store.add_job(1, &JobConfig::default()).await.unwrap()[0];

        store
            .update_phase_output(id, "a", json!({ "x": 1 }))
            .await
            .unwrap();
        store.update_phase_output(id, "b", json!(2)).await.unwrap();
        let job = store
            .update_phase_output(id, "a", json!({ "x": 3 }))
            .await
            .unwrap();

        assert_eq!(job.phase_outputs.get("a"), Some(&json!({ "x": 3 })));
        assert_eq!(job.phase_outputs.get("b"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_status_effects() {
        let store = MemoryJobStore::new();
        let id = store.add_job(1, &JobConfig::default()).await.unwrap()[0];

        let job = store
            .update_status(id, JobStatus::Phase2, Some("ignored"))
            .await
            .unwrap();
        assert!(job.error.is_none());
        assert!(job.completed_at.is_none());

        let job = store
            .update_status(id, JobStatus::Failed, Some("phase2: exit code 1"))
            .await
            .unwrap();
        assert_eq!(job.error.as_deref(), Some("phase2: exit code 1"));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_job_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store
            .update_status(JobId::new(99), JobStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_jobs_filters_and_pages_newest_first() {
        let store = MemoryJobStore::new();
        let ids = store.add_job(5, &JobConfig::default()).await.unwrap();
        store
            .update_status(ids[1], JobStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let all = store.get_jobs(&JobFilter::default()).await.unwrap();
        let order: Vec<_> = all.iter().map(|job| job.id).collect();
        let mut expected = ids.clone();
        expected.reverse();
        assert_eq!(order, expected);

        let failed = store
            .get_jobs(&JobFilter {
                status: Some(JobStatus::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, ids[1]);

        let page = store
            .get_jobs(&JobFilter {
                status: None,
                limit: 2,
                offset: 1,
            })
            .await
            .unwrap();
        assert_eq!(
            page.iter().map(|job| job.id).collect::<Vec<_>>(),
            vec![ids[3], ids[2]]
        );
    }

    #[tokio::test]
    async fn test_logs_are_returned_oldest_first() {
        let store = MemoryJobStore::new();
        let ids = store.add_job(2, &JobConfig::default()).await.unwrap();
        store.add_log(ids[0], LogLevel::Info, "one").await.unwrap();
        store.add_log(ids[1], LogLevel::Info, "other").await.unwrap();
        store.add_log(ids[0], LogLevel::Error, "two").await.unwrap();

        let logs = store.get_job_logs(ids[0]).await.unwrap();
        let messages: Vec<_> = logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["one", "two"]);
        assert_eq!(logs[1].level, LogLevel::Error);
    }

    #[tokio::test]
    async fn test_cleanup_old_removes_jobs_and_logs() {
        let store = MemoryJobStore::new();
        let ids = store.add_job(3, &JobConfig::default()).await.unwrap();
        store.add_log(ids[0], LogLevel::Info, "old").await.unwrap();
        backdate(&store, ids[0], 10).await;
        backdate(&store, ids[1], 8).await;

        assert_eq!(store.cleanup_old(7).await.unwrap(), 2);
        assert!(store.get_job(ids[0]).await.unwrap().is_none());
        assert!(store.get_job(ids[1]).await.unwrap().is_none());
        assert!(store.get_job(ids[2]).await.unwrap().is_some());
        assert!(store.get_job_logs(ids[0]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_old_with_huge_age_keeps_everything() {
        let store = MemoryJobStore::new();
        let ids = store.add_job(1, &JobConfig::default()).await.unwrap();
        backdate(&store, ids[0], 10).await;

        assert_eq!(store.cleanup_old(u32::MAX).await.unwrap(), 0);
        assert!(store.get_job(ids[0]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stats_groups_by_status() {
        let store = MemoryJobStore::new();
        let ids = store.add_job(4, &JobConfig::default()).await.unwrap();
        store.get_next_job().await.unwrap();
        store
            .update_status(ids[1], JobStatus::Phase3, None)
            .await
            .unwrap();
        store
            .update_status(ids[2], JobStatus::Completed, None)
            .await
            .unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.total, 4);
    }
}
