//! Cluster analysis engine library
//!
//! This crate provides the core functionality for:
//! - Topology tracking of nodes, pods and metric agents
//! - Metric collection from per-node agents over gRPC
//! - Node scoring and threshold-triggered pod eviction
//! - Deployment churn tracking
//! - The score query service, health checks and observability

pub mod api;
pub mod backoff;
pub mod churn;
pub mod cluster;
pub mod collector;
pub mod config;
pub mod engine;
pub mod health;
pub mod models;
pub mod observability;
pub mod proto;
pub mod remediation;
pub mod scoring;
pub mod server;
pub mod topology;
pub mod watch;

pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineBuilder, ScoreReader, TickReport};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use scoring::{level, score, Level, ScoringFormula};
