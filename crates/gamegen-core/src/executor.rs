//! Executor trait and execution unit types.
//!
//! Executors run one pipeline phase in an isolated, resource-limited unit
//! (a container). Hard timeout enforcement belongs to the executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ExecutionRequest, Result};

/// Handle to a spawned execution unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    /// Executor-specific identifier (e.g. container ID).
    pub execution_id: String,
    /// Human-readable unit name.
    pub name: String,
}

/// Observed state of an execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub running: bool,
    pub exit_code: Option<i64>,
}

impl UnitStatus {
    pub fn succeeded(&self) -> bool {
        !self.running && self.exit_code == Some(0)
    }
}

/// Trait for phase executors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Spawn an execution unit for the request.
    async fn spawn(&self, request: &ExecutionRequest) -> Result<ExecutionHandle>;

    /// Current status of a unit, `None` if it no longer exists.
    async fn poll_status(&self, handle: &ExecutionHandle) -> Result<Option<UnitStatus>>;

    /// Combined output of a unit.
    async fn fetch_logs(&self, handle: &ExecutionHandle) -> Result<String>;

    /// Remove finished units. Returns how many were removed.
    async fn cleanup_finished(&self) -> Result<usize>;
}
