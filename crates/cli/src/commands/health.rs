//! Engine health status

use anyhow::Result;
use colored::Colorize;
use engine_lib::HealthResponse;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: HealthResponse = client.get("healthz").await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        OutputFormat::Table => {
            println!("{}", "Engine Health".bold());
            println!("{}", "=".repeat(40));
            println!("Status: {}", color_status(health.status));
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(component.status),
                    message: component.message.clone().unwrap_or_else(|| "-".to_string()),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}
