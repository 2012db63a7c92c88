//! Application state.

use gamegen_core::deployer::Deployer;
use gamegen_db::JobStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub deployer: Arc<dyn Deployer>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, deployer: Arc<dyn Deployer>) -> Self {
        Self { store, deployer }
    }
}
