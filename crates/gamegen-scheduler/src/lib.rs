//! Job scheduling and pipeline orchestration for the game generation pipeline.
//!
//! A [`Scheduler`] claims queued jobs on a fixed tick and runs each one
//! through a [`PipelineOrchestrator`] inside a bounded [`WorkerPool`].

pub mod error;
pub mod genre;
pub mod maintenance;
pub mod orchestrator;
pub mod poll;
pub mod pool;
pub mod repair;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use error::PipelineError;
pub use maintenance::{Maintenance, MaintenanceReport};
pub use orchestrator::PipelineOrchestrator;
pub use poll::Poller;
pub use pool::{Slot, WorkerPool};
pub use repair::{RepairOutcome, RepairSummary};
pub use scheduler::Scheduler;
