//! Job store contract.

use async_trait::async_trait;
use gamegen_core::{Job, JobConfig, JobFilter, JobId, JobLogEntry, JobStats, JobStatus, LogLevel};
use serde_json::Value;

use crate::DbResult;

/// Durable record of jobs, their phase outputs and logs.
///
/// `get_next_job` is the only way a job leaves `queued`; each queued job is
/// handed to at most one caller, which is then the sole writer of that job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create `count` queued jobs sharing `config`. Returns their ids in creation order.
    async fn add_job(&self, count: u32, config: &JobConfig) -> DbResult<Vec<JobId>>;

    /// Atomically claim the oldest queued job, moving it to `running`.
    async fn get_next_job(&self) -> DbResult<Option<Job>>;

    /// Move a job to `status`. `error` is persisted only for `failed`.
    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<&str>,
    ) -> DbResult<Job>;

    /// Merge `{key: value}` into the job's phase outputs.
    async fn update_phase_output(&self, id: JobId, key: &str, value: Value) -> DbResult<Job>;

    async fn get_job(&self, id: JobId) -> DbResult<Option<Job>>;

    /// List jobs newest first.
    async fn get_jobs(&self, filter: &JobFilter) -> DbResult<Vec<Job>>;

    async fn add_log(&self, id: JobId, level: LogLevel, message: &str) -> DbResult<()>;

    /// Logs of a job, oldest first.
    async fn get_job_logs(&self, id: JobId) -> DbResult<Vec<JobLogEntry>>;

    /// Delete jobs created more than `days_old` days ago, logs first.
    /// Returns the number of jobs deleted.
    async fn cleanup_old(&self, days_old: u32) -> DbResult<u64>;

    async fn get_stats(&self) -> DbResult<JobStats>;
}
