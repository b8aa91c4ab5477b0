//! Node score listing

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::Tabled;

use crate::client::ScoreClient;
use crate::output::{color_level, format_score, print_warning, OutputFormat};

#[derive(Tabled)]
struct ScoreRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Level")]
    level: String,
}

#[derive(Serialize)]
struct ScoreEntry {
    node: String,
    score: f64,
    level: u8,
}

fn entries(scores: &BTreeMap<String, f64>) -> Vec<ScoreEntry> {
    scores
        .iter()
        .map(|(node, &score)| ScoreEntry {
            node: node.clone(),
            score,
            level: engine_lib::level(score).value(),
        })
        .collect()
}

/// Print every node's latest score, sorted by node name
pub async fn show_scores(mut client: ScoreClient, format: OutputFormat) -> Result<()> {
    let scores = client.node_scores().await?;
    let entries = entries(&scores);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Table => {
            if entries.is_empty() {
                print_warning("No nodes have been scored yet");
                return Ok(());
            }

            let rows: Vec<ScoreRow> = entries
                .iter()
                .map(|e| ScoreRow {
                    node: e.node.cyan().to_string(),
                    score: format_score(e.score),
                    level: color_level(engine_lib::level(e.score)),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} nodes", entries.len());
        }
    }

    Ok(())
}
