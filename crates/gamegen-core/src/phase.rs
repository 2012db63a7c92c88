//! Pipeline phases and per-phase execution requests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::{JobId, JobStatus};

/// One ordered step of the pipeline. `Phase5` is the repair unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Phase1,
    Phase2,
    Phase3,
    Phase4,
    Phase5,
}

impl Phase {
    /// Generation phases, in execution order.
    pub const GENERATION: [Phase; 4] = [Phase::Phase1, Phase::Phase2, Phase::Phase3, Phase::Phase4];

    pub fn key(&self) -> &'static str {
        match self {
            Phase::Phase1 => "phase1",
            Phase::Phase2 => "phase2",
            Phase::Phase3 => "phase3",
            Phase::Phase4 => "phase4",
            Phase::Phase5 => "phase5",
        }
    }

    /// Status substate a job is in while this phase runs.
    pub fn status(&self) -> JobStatus {
        match self {
            Phase::Phase1 => JobStatus::Phase1,
            Phase::Phase2 => JobStatus::Phase2,
            Phase::Phase3 => JobStatus::Phase3,
            Phase::Phase4 => JobStatus::Phase4,
            Phase::Phase5 => JobStatus::Phase5,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        match self {
            Phase::Phase5 => Duration::from_secs(3600),
            _ => Duration::from_secs(43_200),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Request to run one phase in an isolated execution unit.
///
/// Built fresh for every spawn; never stored on the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub job_id: JobId,
    pub phase: Phase,
    /// Repair attempt number, for phase5 units.
    pub attempt: Option<u32>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl ExecutionRequest {
    pub fn builder(job_id: JobId, phase: Phase, timeout: Duration) -> ExecutionRequestBuilder {
        ExecutionRequestBuilder {
            request: ExecutionRequest {
                job_id,
                phase,
                attempt: None,
                env: BTreeMap::new(),
                timeout,
            },
        }
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    /// Environment as `KEY=value` pairs.
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    /// Name of the execution unit, unique per job, phase and attempt.
    pub fn unit_name(&self) -> String {
        match self.attempt {
            Some(attempt) => format!("gamegen-worker-{}-{}-{}", self.job_id, self.phase, attempt),
            None => format!("gamegen-worker-{}-{}", self.job_id, self.phase),
        }
    }
}

/// Builder for [`ExecutionRequest`].
#[derive(Debug, Clone)]
pub struct ExecutionRequestBuilder {
    request: ExecutionRequest,
}

impl ExecutionRequestBuilder {
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.request
            .env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.request.attempt = Some(attempt);
        self
    }

    pub fn build(self) -> ExecutionRequest {
        self.request
    }
}
