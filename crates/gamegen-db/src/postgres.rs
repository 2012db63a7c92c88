//! PostgreSQL job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gamegen_core::{
    Job, JobConfig, JobFilter, JobId, JobLogEntry, JobStats, JobStatus, LogLevel, PhaseOutputs,
};
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;

use crate::{DbError, DbResult, JobStore};

/// A job row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRow {
    id: i64,
    status: String,
    game_name: Option<String>,
    phase_outputs: Value,
    config: Value,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e| DbError::Decode(format!("job {}: {}", row.id, e)))?;
        let config: JobConfig = serde_json::from_value(row.config)
            .map_err(|e| DbError::Decode(format!("job {} config: {}", row.id, e)))?;
        let phase_outputs = match row.phase_outputs {
            Value::Object(map) => PhaseOutputs::from(map),
            Value::Null => PhaseOutputs::new(),
            other => {
                return Err(DbError::Decode(format!(
                    "job {} phase_outputs is not an object: {}",
                    row.id, other
                )));
            }
        };

        Ok(Job {
            id: JobId::new(row.id),
            status,
            game_name: row.game_name,
            config,
            phase_outputs,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

/// A job log row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct LogRow {
    id: i64,
    job_id: i64,
    level: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for JobLogEntry {
    type Error = DbError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        let level: LogLevel = row
            .level
            .parse()
            .map_err(|e| DbError::Decode(format!("log {}: {}", row.id, e)))?;
        Ok(JobLogEntry {
            id: row.id,
            job_id: JobId::new(row.job_id),
            level,
            message: row.message,
            created_at: row.created_at,
        })
    }
}

/// PostgreSQL implementation of JobStore.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn add_job(&self, count: u32, config: &JobConfig) -> DbResult<Vec<JobId>> {
        let config = serde_json::to_value(config)
            .map_err(|e| DbError::Decode(format!("job config: {e}")))?;

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO jobs (status, config, phase_outputs, created_at, updated_at)
                VALUES ('queued', $1, '{}'::jsonb, clock_timestamp(), clock_timestamp())
                RETURNING id
                "#,
            )
            .bind(&config)
            .fetch_one(&mut *tx)
            .await?;
            ids.push(JobId::new(id));
        }
        tx.commit().await?;
        Ok(ids)
    }

    /// Uses SKIP LOCKED so concurrent claimers never wait on each other's rows.
    async fn get_next_job(&self) -> DbResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'running', started_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'queued'
                ORDER BY created_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<&str>,
    ) -> DbResult<Job> {
        let error = match status {
            JobStatus::Failed => error,
            _ => None,
        };

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = $2,
                error = COALESCE($3, error),
                started_at = CASE WHEN $2 = 'running' THEN COALESCE(started_at, NOW()) ELSE started_at END,
                completed_at = CASE WHEN $2 IN ('completed', 'failed') THEN NOW() ELSE NULL END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.get())
        .bind(status.as_str())
        .bind(error)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::job_not_found(id))?;

        debug!(job_id = %id, status = %status, "Updated job status");
        Job::try_from(row)
    }

    async fn update_phase_output(&self, id: JobId, key: &str, value: Value) -> DbResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET phase_outputs = phase_outputs || jsonb_build_object($2::text, $3::jsonb),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.get())
        .bind(key)
        .bind(value)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::job_not_found(id))?;

        Job::try_from(row)
    }

    async fn get_job(&self, id: JobId) -> DbResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn get_jobs(&self, filter: &JobFilter) -> DbResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit.max(0))
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn add_log(&self, id: JobId, level: LogLevel, message: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_logs (job_id, level, message, created_at)
            VALUES ($1, $2, $3, clock_timestamp())
            "#,
        )
        .bind(id.get())
        .bind(level.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job_logs(&self, id: JobId) -> DbResult<Vec<JobLogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT id, job_id, level, message, created_at
            FROM job_logs
            WHERE job_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobLogEntry::try_from).collect()
    }

    async fn cleanup_old(&self, days_old: u32) -> DbResult<u64> {
        let days = i32::try_from(days_old).unwrap_or(i32::MAX);
        let mut tx = self.pool.begin().await?;

        // Logs first, so the job delete never depends on the cascade.
        sqlx::query(
            r#"
            DELETE FROM job_logs WHERE job_id IN (
                SELECT id FROM jobs WHERE created_at < NOW() - make_interval(days => $1)
            )
            "#,
        )
        .bind(days)
        .execute(&mut *tx)
        .await?;

        let result =
            sqlx::query("DELETE FROM jobs WHERE created_at < NOW() - make_interval(days => $1)")
                .bind(days)
                .execute(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn get_stats(&self) -> DbResult<JobStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) AS count FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = JobStats::default();
        for (status, count) in rows {
            stats.add(status.parse().ok(), count);
        }
        Ok(stats)
    }
}

/// Integration tests that require PostgreSQL.
/// Run with: DATABASE_URL=... cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn store() -> PgJobStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::create_pool(&url).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        sqlx::query("TRUNCATE job_logs, jobs RESTART IDENTITY CASCADE")
            .execute(&pool)
            .await
            .unwrap();
        PgJobStore::new(pool)
    }

    #[tokio::test]
    #[ignore]
    async fn test_claim_in_creation_order() {
        let store = store().await;
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
    #[ignore]
    async fn test_concurrent_claims_are_exclusive() {
        let store = Arc::new(store().await);
        store.add_job(5, &JobConfig::default()).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_next_job().await.unwrap() })
            })
            .collect();

        let mut claimed = HashSet::new();
        for handle in handles {
            if let Some(job) = handle.await.unwrap() {
                assert!(claimed.insert(job.id), "job {} claimed twice", job.id);
            }
        }
        assert_eq!(claimed.len(), 5);
        assert_eq!(store.get_stats().await.unwrap().queued, 0);
    }

    #[tokio::test]
    #[ignore]
    async fn test_phase_output_merge() {
        let store = store().await;
        let id = store.add_job(1, &JobConfig::default()).await.unwrap()[0];

        store
            .update_phase_output(id, "a", serde_json::json!({ "x": 1 }))
            .await
            .unwrap();
        store
            .update_phase_output(id, "b", serde_json::json!(2))
            .await
            .unwrap();
        let job = store
            .update_phase_output(id, "a", serde_json::json!({ "x": 3 }))
            .await
            .unwrap();

        assert_eq!(job.phase_outputs.get("a"), Some(&serde_json::json!({ "x": 3 })));
        assert_eq!(job.phase_outputs.get("b"), Some(&serde_json::json!(2)));
    }

    #[tokio::test]
    #[ignore]
    async fn test_failed_status_records_error() {
        let store = store().await;
        let id = store.add_job(1, &JobConfig::default()).await.unwrap()[0];

        let job = store
            .update_status(id, JobStatus::Failed, Some("phase2: exit code 1"))
            .await
            .unwrap();
        assert_eq!(job.error.as_deref(), Some("phase2: exit code 1"));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    #[ignore]
    async fn test_cleanup_removes_old_jobs_and_logs() {
        let store = store().await;
        let old = store.add_job(1, &JobConfig::default()).await.unwrap()[0];
        let fresh = store.add_job(1, &JobConfig::default()).await.unwrap()[0];
        store.add_log(old, LogLevel::Info, "old").await.unwrap();
        sqlx::query("UPDATE jobs SET created_at = NOW() - INTERVAL '10 days' WHERE id = $1")
            .bind(old.get())
            .execute(store.pool())
            .await
            .unwrap();

        assert_eq!(store.cleanup_old(7).await.unwrap(), 1);
        assert!(store.get_job(old).await.unwrap().is_none());
        assert!(store.get_job(fresh).await.unwrap().is_some());
        assert!(store.get_job_logs(old).await.unwrap().is_empty());
    }
}
