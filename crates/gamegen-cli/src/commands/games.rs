//! Published game commands.

use anyhow::Result;
use gamegen_core::deployer::{DeployedGame, Removal};
use serde::Deserialize;

use crate::client::ApiClient;

#[derive(Debug, Deserialize)]
struct GamesResponse {
    games: Vec<DeployedGame>,
}

pub async fn list(client: &ApiClient) -> Result<()> {
    let response: GamesResponse = client.get("games", &[]).await?;
    if response.games.is_empty() {
        println!("No published games");
        return Ok(());
    }
    for game in &response.games {
        println!("{}", game_row(game));
    }
    Ok(())
}

pub async fn remove(client: &ApiClient, id: i64) -> Result<()> {
    let removal: Removal = client.delete(&format!("games/{id}")).await?;
    if removal.removed {
        println!("Removed game {}", removal.game_id);
    } else {
        println!("Game {} was not published", removal.game_id);
    }
    Ok(())
}

fn game_row(game: &DeployedGame) -> String {
    format!(
        "{:<6} {:<32} {}",
        game.game_id.to_string(),
        game.title.as_deref().unwrap_or(&game.name),
        game.url
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamegen_core::JobId;

    #[test]
    fn test_game_row_falls_back_to_name() {
        let mut game = DeployedGame {
            game_id: JobId::new(7),
            name: "gamedemo7".to_string(),
            title: None,
            url: "https://gamedemo7.example.com".to_string(),
            port: 8087,
        };
        let row = game_row(&game);
        assert!(row.starts_with("7 "));
        assert!(row.contains("gamedemo7"));
        assert!(row.ends_with("https://gamedemo7.example.com"));

        game.title = Some("Moon Miner".to_string());
        assert!(game_row(&game).contains("Moon Miner"));
    }
}
