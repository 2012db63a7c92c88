//! Deployer trait and deployment types.
//!
//! Deployers publish a job's build output to a reachable URL and keep the
//! public game listing up to date.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{JobId, Result};

/// Result of publishing a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub game_id: JobId,
    pub url: String,
    pub deploy_path: String,
    pub port: u32,
}

/// A game currently published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedGame {
    pub game_id: JobId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub url: String,
    pub port: u32,
}

/// Result of removing a published game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Removal {
    pub game_id: JobId,
    pub removed: bool,
}

/// Trait for deployers.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Name of this deployer.
    fn name(&self) -> &'static str;

    /// Publish the files in `source_dir` for a job.
    async fn deploy(
        &self,
        job_id: JobId,
        display_name: &str,
        source_dir: &Path,
    ) -> Result<Deployment>;

    /// List all published games.
    async fn list_deployed(&self) -> Result<Vec<DeployedGame>>;

    /// Take a published game down.
    async fn remove(&self, job_id: JobId) -> Result<Removal>;

    /// Write the public listing.
    async fn publish_listing(&self, games: &[DeployedGame]) -> Result<()>;
}
