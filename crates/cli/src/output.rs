//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use engine_lib::{ComponentStatus, Level};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn format_score(score: f64) -> String {
    format!("{:.2}", score)
}

/// Color a level from green (idle) to red (saturated)
pub fn color_level(level: Level) -> String {
    let text = level.to_string();
    match level.value() {
        1 | 2 => text.green().to_string(),
        3 => text.yellow().to_string(),
        _ => text.red().to_string(),
    }
}

pub fn color_status(status: ComponentStatus) -> String {
    match status {
        ComponentStatus::Healthy => "healthy".green().to_string(),
        ComponentStatus::Degraded => "degraded".yellow().to_string(),
        ComponentStatus::Unhealthy => "unhealthy".red().to_string(),
    }
}
