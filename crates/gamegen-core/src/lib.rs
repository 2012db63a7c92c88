//! Core domain types and traits for the game generation pipeline.
//!
//! This crate contains:
//! - Job identifiers, statuses and configuration
//! - Phase definitions and per-phase execution requests
//! - Executor, Deployer and QualityOracle collaborator traits
//! - Workspace layout shared by the executor and the orchestrator

pub mod deployer;
pub mod error;
pub mod executor;
pub mod id;
pub mod job;
pub mod oracle;
pub mod phase;
pub mod workspace;

pub use error::{Error, Result};
pub use id::JobId;
pub use job::{
    Job, JobConfig, JobFilter, JobLogEntry, JobStats, JobStatus, LogLevel, PhaseOutputs, Provider,
};
pub use phase::{ExecutionRequest, Phase};
pub use workspace::WorkspaceLayout;
