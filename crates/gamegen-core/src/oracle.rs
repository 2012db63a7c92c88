//! Quality oracle trait and report types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// Severity of a defect found by the oracle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    Critical,
    Major,
    #[default]
    Minor,
    Unknown,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
            Severity::Unknown => "unknown",
        }
    }
}

impl From<String> for Severity {
    fn from(value: String) -> Self {
        match value.as_str() {
            "critical" => Severity::Critical,
            "major" => Severity::Major,
            "minor" => Severity::Minor,
            _ => Severity::Unknown,
        }
    }
}

impl From<Severity> for String {
    fn from(severity: Severity) -> Self {
        severity.as_str().to_string()
    }
}

/// A single defect in a deployed build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
}

impl Defect {
    pub fn new(severity: Severity, description: impl Into<String>) -> Self {
        Self {
            severity,
            description: description.into(),
        }
    }
}

/// Oracle verdict on a deployed build. Missing fields decode to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub defects: Vec<Defect>,
    #[serde(default)]
    pub checks: Map<String, Value>,
}

impl QualityReport {
    /// Report used when the oracle itself could not run.
    pub fn runner_error(message: impl std::fmt::Display) -> Self {
        Self {
            score: 0.0,
            defects: vec![Defect::new(
                Severity::Critical,
                format!("Test runner error: {message}"),
            )],
            checks: Map::new(),
        }
    }

    /// Order defects critical first.
    pub fn sort_defects(&mut self) {
        self.defects.sort_by_key(|d| d.severity);
    }
}

/// One scored repair attempt, stored in the job's phase outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairAttemptRecord {
    pub attempt: u32,
    pub score: f64,
    pub defect_count: usize,
    pub defects: Vec<Defect>,
    #[serde(default)]
    pub checks: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl RepairAttemptRecord {
    pub const KEY_PREFIX: &'static str = "repair_attempt_";

    /// Build a record keeping at most `max_defects` defects.
    pub fn from_report(attempt: u32, report: &QualityReport, max_defects: usize) -> Self {
        Self {
            attempt,
            score: report.score,
            defect_count: report.defects.len(),
            defects: report.defects.iter().take(max_defects).cloned().collect(),
            checks: report.checks.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Phase-output key for an attempt.
    pub fn key(attempt: u32) -> String {
        format!("{}{}", Self::KEY_PREFIX, attempt)
    }
}

/// Trait for quality oracles.
#[async_trait]
pub trait QualityOracle: Send + Sync {
    /// Name of this oracle.
    fn name(&self) -> &'static str;

    /// Score the build reachable at `url`.
    async fn evaluate(&self, url: &str) -> Result<QualityReport>;
}
