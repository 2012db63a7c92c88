//! Published game endpoints.

use axum::extract::{Path, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use gamegen_core::JobId;
use gamegen_core::deployer::{DeployedGame, Removal};
use serde::Serialize;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/games", get(list_games))
        .route("/games/{id}", delete(remove_game))
}

#[derive(Debug, Serialize)]
struct GamesResponse {
    games: Vec<DeployedGame>,
}

async fn list_games(State(state): State<AppState>) -> Result<Json<GamesResponse>, ApiError> {
    let games = state.deployer.list_deployed().await?;
    Ok(Json(GamesResponse { games }))
}

async fn remove_game(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Removal>, ApiError> {
    let job_id = JobId::new(id);
    let removal = state.deployer.remove(job_id).await?;
    info!(job_id = %job_id, "Removed game via API");

    match state.deployer.list_deployed().await {
        Ok(games) => {
            if let Err(e) = state.deployer.publish_listing(&games).await {
                warn!(error = %e, "Failed to refresh game listing");
            }
        }
        Err(e) => warn!(error = %e, "Failed to list games"),
    }

    Ok(Json(removal))
}
