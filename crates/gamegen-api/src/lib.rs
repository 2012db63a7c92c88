//! API server for the game generation pipeline.
//!
//! Provides the HTTP REST API for queueing jobs, inspecting their progress
//! and managing published games.

pub mod error;
pub mod routes;
pub mod settings;
pub mod state;

pub use settings::ServerSettings;
pub use state::AppState;
