//! Job records, statuses and configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::oracle::RepairAttemptRecord;
use crate::{Error, JobId};

/// Status of a job.
///
/// Jobs start `queued`, are claimed into `running`, move through the
/// `phase_N` substates and end in `completed` or `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "phase_1")]
    Phase1,
    #[serde(rename = "phase_2")]
    Phase2,
    #[serde(rename = "phase_3")]
    Phase3,
    #[serde(rename = "phase_4")]
    Phase4,
    #[serde(rename = "phase_5")]
    Phase5,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Phase1,
        JobStatus::Phase2,
        JobStatus::Phase3,
        JobStatus::Phase4,
        JobStatus::Phase5,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Phase1 => "phase_1",
            JobStatus::Phase2 => "phase_2",
            JobStatus::Phase3 => "phase_3",
            JobStatus::Phase4 => "phase_4",
            JobStatus::Phase5 => "phase_5",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a job in this status has finished its first phase.
    pub fn has_passed_phase1(&self) -> bool {
        matches!(
            self,
            JobStatus::Phase2
                | JobStatus::Phase3
                | JobStatus::Phase4
                | JobStatus::Phase5
                | JobStatus::Completed
        )
    }

    fn valid_list() -> String {
        Self::ALL
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| Error::InvalidStatus {
                value: s.to_string(),
                valid: Self::valid_list(),
            })
    }
}

/// Model provider a job generates with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Default,
    Alternate,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Default => f.write_str("default"),
            Provider::Alternate => f.write_str("alternate"),
        }
    }
}

/// Client-supplied job configuration.
///
/// Unknown option keys are preserved in `extra` and round-trip through the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobConfig {
    /// Whether the client asked for a linked default/alternate pair.
    pub fn wants_comparison(&self) -> bool {
        self.compare.unwrap_or(false)
    }
}

/// Per-job phase outputs. Keys are only ever added or overwritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseOutputs(Map<String, Value>);

impl PhaseOutputs {
    pub const GENRE_SEED: &'static str = "genreSeed";
    pub const DEPLOYMENT: &'static str = "deployment";
    pub const REPAIR: &'static str = "repair";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge `{key: value}` in, leaving every other key untouched.
    pub fn merge(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn genre_seed(&self) -> Option<&str> {
        self.0.get(Self::GENRE_SEED).and_then(Value::as_str)
    }

    /// Source job this job's phase1 output was copied from, if any.
    pub fn copied_from(&self) -> Option<JobId> {
        self.0
            .get("phase1")
            .and_then(|v| v.get("copiedFrom"))
            .and_then(Value::as_i64)
            .map(JobId::new)
    }

    /// Recorded repair attempts, ordered by attempt number.
    pub fn repair_attempts(&self) -> Vec<RepairAttemptRecord> {
        let mut attempts: Vec<RepairAttemptRecord> = self
            .0
            .iter()
            .filter(|(key, _)| key.starts_with(RepairAttemptRecord::KEY_PREFIX))
            .filter_map(|(_, value)| serde_json::from_value(value.clone()).ok())
            .collect();
        attempts.sort_by_key(|a| a.attempt);
        attempts
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for PhaseOutputs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A game generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub game_name: Option<String>,
    pub config: JobConfig,
    pub phase_outputs: PhaseOutputs,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Name used when publishing the job's build.
    pub fn display_name(&self) -> String {
        self.game_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("Game {}", self.id))
    }
}

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(Error::InvalidInput(format!("unknown log level: {other}"))),
        }
    }
}

/// A single entry in a job's log stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub id: i64,
    pub job_id: JobId,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Filter for listing jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// Job counts grouped by status. `phase_N` jobs only count toward `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

impl JobStats {
    /// Fold one `(status, count)` group into the stats.
    pub fn add(&mut self, status: Option<JobStatus>, count: i64) {
        match status {
            Some(JobStatus::Queued) => self.queued += count,
            Some(JobStatus::Running) => self.running += count,
            Some(JobStatus::Completed) => self.completed += count,
            Some(JobStatus::Failed) => self.failed += count,
            _ => {}
        }
        self.total += count;
    }
}
