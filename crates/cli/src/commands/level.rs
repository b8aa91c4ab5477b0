//! Score to level lookup

use anyhow::Result;
use serde_json::json;

use crate::output::{color_level, format_score, OutputFormat};

pub fn show_level(score: f64, format: OutputFormat) -> Result<()> {
    let level = engine_lib::level(score);

    match format {
        OutputFormat::Json => {
            let body = json!({ "score": score, "level": level.value() });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Table => {
            println!("Score {} -> level {}", format_score(score), color_level(level));
        }
    }

    Ok(())
}
