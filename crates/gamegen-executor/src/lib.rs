//! Execution unit backends for the game generation pipeline.
//!
//! Each pipeline phase runs in its own resource-limited Docker container.

pub mod docker;

pub use docker::{DockerExecutor, DockerExecutorConfig, TIMEOUT_EXIT_CODE};
pub use gamegen_core::executor::{ExecutionHandle, Executor, UnitStatus};
