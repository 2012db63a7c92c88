//! Deployment backends for the game generation pipeline.
//!
//! Publishes a job's build as a static site served by nginx behind Traefik,
//! and maintains the gallery listing of published games.

pub mod compose;
pub mod static_site;

pub use gamegen_core::deployer::{DeployedGame, Deployer, Deployment, Removal};
pub use static_site::{StaticSiteConfig, StaticSiteDeployer};
