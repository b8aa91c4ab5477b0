//! Analysis engine CLI
//!
//! A command-line tool for querying node scores and engine health.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{health, level, scores};

/// Analysis engine CLI
#[derive(Parser)]
#[command(name = "aectl")]
#[command(author, version, about = "CLI for the cluster analysis engine", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the latest score of every node
    Scores {
        /// Score server address (can also be set via AECTL_ENGINE env var)
        #[arg(long, env = "AECTL_ENGINE", default_value = "http://localhost:50051")]
        engine: String,
    },

    /// Show engine component health
    Health {
        /// Engine HTTP API URL (can also be set via AECTL_API_URL env var)
        #[arg(long, env = "AECTL_API_URL", default_value = "http://localhost:8080")]
        api_url: String,
    },

    /// Show the level a score maps to
    Level {
        /// Node score in percent
        #[arg(allow_negative_numbers = true)]
        score: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scores { engine } => {
            let client = client::ScoreClient::connect(&engine).await?;
            scores::show_scores(client, cli.format).await?;
        }
        Commands::Health { api_url } => {
            let client = client::ApiClient::new(&api_url)?;
            health::show_health(&client, cli.format).await?;
        }
        Commands::Level { score } => {
            level::show_level(score, cli.format)?;
        }
    }

    Ok(())
}
