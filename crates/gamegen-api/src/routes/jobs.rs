//! Job endpoints: queueing, listing, logs and stats.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use gamegen_core::{
    Job, JobConfig, JobFilter, JobId, JobLogEntry, JobStats, JobStatus, Provider,
};
use gamegen_db::{DbResult, JobStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

/// Largest batch a single generate request may queue.
pub const MAX_BATCH: u64 = 50;

/// Largest page `GET /jobs` returns.
const MAX_PAGE: i64 = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generate))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/logs", get(get_job_logs))
        .route("/stats", get(get_stats))
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    count: Option<Value>,
    #[serde(default)]
    options: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    job_ids: Vec<JobId>,
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    comparison: Option<Comparison>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Comparison {
    pair_count: usize,
    pairs: Vec<ComparisonPair>,
}

/// A default-provider job and the alternate-provider job reusing its phase1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
struct ComparisonPair {
    default: JobId,
    alternate: JobId,
}

/// Jobs created by one generate request.
#[derive(Debug, Default)]
struct Enqueued {
    job_ids: Vec<JobId>,
    pairs: Option<Vec<ComparisonPair>>,
}

async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<GenerateResponse>), ApiError> {
    let count = parse_count(req.count.as_ref())?;
    let config: JobConfig = match req.options {
        None | Some(Value::Null) => JobConfig::default(),
        Some(options) => serde_json::from_value(options)
            .map_err(|e| ApiError::BadRequest(format!("invalid options: {e}")))?,
    };

    let enqueued = enqueue(state.store.as_ref(), count, &config).await?;
    info!(
        count = enqueued.job_ids.len(),
        compare = config.wants_comparison(),
        "Queued jobs"
    );

    Ok((
        StatusCode::CREATED,
        Json(GenerateResponse {
            count: enqueued.job_ids.len(),
            job_ids: enqueued.job_ids,
            comparison: enqueued.pairs.map(|pairs| Comparison {
                pair_count: pairs.len(),
                pairs,
            }),
        }),
    ))
}

/// `count` may be a number or a numeric string; missing means one.
fn parse_count(count: Option<&Value>) -> Result<u32, ApiError> {
    let parsed = match count {
        None | Some(Value::Null) => return Ok(1),
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    };

    parsed
        .filter(|n| (1..=MAX_BATCH).contains(n))
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            ApiError::BadRequest(format!("count must be an integer between 1 and {MAX_BATCH}"))
        })
}

/// Queue `count` jobs. A comparison request queues, per count, a
/// default-provider job followed by an alternate-provider job that reuses
/// its phase1 output. The `compare` flag itself is not stored on either job.
async fn enqueue(store: &dyn JobStore, count: u32, config: &JobConfig) -> DbResult<Enqueued> {
    if !config.wants_comparison() {
        return Ok(Enqueued {
            job_ids: store.add_job(count, config).await?,
            pairs: None,
        });
    }

    let mut job_ids = Vec::with_capacity(count as usize * 2);
    let mut pairs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let primary = JobConfig {
            provider: Provider::Default,
            source_job_id: None,
            compare: None,
            ..config.clone()
        };
        let Some(&source_id) = store.add_job(1, &primary).await?.first() else {
            continue;
        };
        job_ids.push(source_id);

        let alternate = JobConfig {
            provider: Provider::Alternate,
            source_job_id: Some(source_id),
            compare: None,
            ..config.clone()
        };
        if let Some(&alternate_id) = store.add_job(1, &alternate).await?.first() {
            job_ids.push(alternate_id);
            pairs.push(ComparisonPair {
                default: source_id,
                alternate: alternate_id,
            });
        }
    }
    Ok(Enqueued {
        job_ids,
        pairs: Some(pairs),
    })
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
struct JobsResponse {
    jobs: Vec<Job>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<JobsResponse>, ApiError> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<JobStatus>)
        .transpose()?;

    let defaults = JobFilter::default();
    let filter = JobFilter {
        status,
        limit: query.limit.unwrap_or(defaults.limit).clamp(1, MAX_PAGE),
        offset: query.offset.unwrap_or(defaults.offset).max(0),
    };

    let jobs = state.store.get_jobs(&filter).await?;
    Ok(Json(JobsResponse { jobs }))
}

#[derive(Debug, Serialize)]
struct JobResponse {
    job: Job,
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = find_job(state.store.as_ref(), JobId::new(id)).await?;
    Ok(Json(JobResponse { job }))
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    logs: Vec<JobLogEntry>,
}

async fn get_job_logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<LogsResponse>, ApiError> {
    let job = find_job(state.store.as_ref(), JobId::new(id)).await?;
    let logs = state.store.get_job_logs(job.id).await?;
    Ok(Json(LogsResponse { logs }))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    stats: JobStats,
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.store.get_stats().await?;
    Ok(Json(StatsResponse { stats }))
}

async fn find_job(store: &dyn JobStore, id: JobId) -> Result<Job, ApiError> {
    store
        .get_job(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {id} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(None).unwrap(), 1);
        assert_eq!(parse_count(Some(&json!(3))).unwrap(), 3);
        assert_eq!(parse_count(Some(&json!("4"))).unwrap(), 4);
        assert!(parse_count(Some(&json!(0))).is_err());
        assert!(parse_count(Some(&json!(-2))).is_err());
        assert!(parse_count(Some(&json!("many"))).is_err());
        assert!(parse_count(Some(&json!(MAX_BATCH + 1))).is_err());
    }

    #[tokio::test]
    async fn test_enqueue_comparison_pairs() {
        let store = gamegen_db::MemoryJobStore::new();
        let mut config = JobConfig {
            compare: Some(true),
            model: Some("big-model".to_string()),
            ..Default::default()
        };
        config.extra.insert("genre".to_string(), json!("rpg"));

        let enqueued = enqueue(&store, 2, &config).await.unwrap();
        assert_eq!(enqueued.job_ids.len(), 4);
        let pairs = enqueued.pairs.unwrap();
        assert_eq!(pairs.len(), 2);

        for (ids, pair) in enqueued.job_ids.chunks(2).zip(&pairs) {
            assert_eq!(ids, [pair.default, pair.alternate]);
            let primary = store.get_job(pair.default).await.unwrap().unwrap();
            let alternate = store.get_job(pair.alternate).await.unwrap().unwrap();
            assert_eq!(primary.config.provider, Provider::Default);
            assert_eq!(primary.config.source_job_id, None);
            assert_eq!(alternate.config.provider, Provider::Alternate);
            assert_eq!(alternate.config.source_job_id, Some(primary.id));
            assert_eq!(alternate.config.model.as_deref(), Some("big-model"));

            for job in [&primary, &alternate] {
                assert_eq!(job.config.compare, None);
                assert!(!job.config.wants_comparison());
                assert_eq!(job.config.extra["genre"], "rpg");
            }
        }
    }

    #[tokio::test]
    async fn test_enqueue_plain_batch_has_no_pairs() {
        let store = gamegen_db::MemoryJobStore::new();
        let enqueued = enqueue(&store, 3, &JobConfig::default()).await.unwrap();
        assert_eq!(enqueued.job_ids.len(), 3);
        assert!(enqueued.pairs.is_none());
    }
}
