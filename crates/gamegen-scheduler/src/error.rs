//! Pipeline error types.
//!
//! The `Display` text of a pipeline error is what gets recorded as the
//! failed job's `error`.

use gamegen_core::{JobId, Phase};
use gamegen_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{phase}: exit code {}", exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
    PhaseExit {
        phase: Phase,
        exit_code: Option<i64>,
    },

    #[error("{phase}: {message}")]
    Execution { phase: Phase, message: String },

    #[error("phase1: source job {0} not found")]
    SourceNotFound(JobId),

    #[error("phase1: source job {0} failed")]
    SourceFailed(JobId),

    #[error("phase1: timed out after {waited_secs}s waiting for source job {source_id}")]
    SourceTimeout { source_id: JobId, waited_secs: u64 },

    #[error("quality gate: final score {score:.1} below {threshold:.1}")]
    QualityGate { score: f64, threshold: f64 },

    #[error("store error: {0}")]
    Store(#[from] DbError),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Collaborator(#[from] gamegen_core::Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
