//! CLI command implementations

pub mod health;
pub mod level;
pub mod scores;
