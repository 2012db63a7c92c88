//! Game generation pipeline CLI.

use clap::{Parser, Subcommand};

mod client;
mod commands;

use client::ApiClient;
use commands::ProviderArg;

#[derive(Parser)]
#[command(name = "gamegen")]
#[command(about = "Game generation pipeline CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "GAMEGEN_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue game generation jobs
    Generate {
        /// Number of games to generate
        #[arg(long, default_value = "1")]
        count: u32,
        /// Also generate each game with the alternate provider from the same design
        #[arg(long)]
        compare: bool,
        /// Model passed to the execution units
        #[arg(long)]
        model: Option<String>,
        /// Model provider
        #[arg(long, value_enum)]
        provider: Option<ProviderArg>,
    },
    /// Inspect jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Show job counts by status
    Stats,
    /// Manage published games
    Games {
        #[command(subcommand)]
        command: GameCommands,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// List recent jobs
    List {
        /// Only jobs in this status
        #[arg(long)]
        status: Option<String>,
        /// Maximum number of jobs to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Show job details
    Show {
        /// Job ID
        id: i64,
    },
    /// Print a job's logs
    Logs {
        /// Job ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum GameCommands {
    /// List published games
    List,
    /// Take a published game down
    Remove {
        /// Game (job) ID
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Generate {
            count,
            compare,
            model,
            provider,
        } => {
            commands::jobs::generate(&client, count, compare, model, provider).await?;
        }
        Commands::Jobs { command } => match command {
            JobCommands::List { status, limit } => {
                commands::jobs::list(&client, status, limit).await?;
            }
            JobCommands::Show { id } => {
                commands::jobs::show(&client, id).await?;
            }
            JobCommands::Logs { id } => {
                commands::jobs::logs(&client, id).await?;
            }
        },
        Commands::Stats => {
            commands::jobs::stats(&client).await?;
        }
        Commands::Games { command } => match command {
            GameCommands::List => {
                commands::games::list(&client).await?;
            }
            GameCommands::Remove { id } => {
                commands::games::remove(&client, id).await?;
            }
        },
    }

    Ok(())
}
