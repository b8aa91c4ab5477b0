//! Engine configuration
//!
//! Loaded with the `config` crate from an optional file named by
//! `ENGINE_CONFIG`, overridden by `ENGINE_*` environment variables.

use crate::backoff::BackoffConfig;
use crate::remediation::RemediationPolicy;
use crate::scoring::{ScoreWeights, ScoringFormula};
use crate::topology::{AgentLocator, NamespaceFilter, DEFAULT_SYSTEM_NAMESPACES};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "ENGINE";
const CONFIG_PATH_VAR: &str = "ENGINE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Name attached to every log record
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// gRPC score query port
    #[serde(default = "default_score_port")]
    pub score_port: u16,

    /// Health and metrics HTTP port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_agent_port")]
    pub agent_port: u16,

    #[serde(default = "default_agent_namespace")]
    pub agent_namespace: String,

    #[serde(default = "default_agent_label_selector")]
    pub agent_label_selector: String,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,

    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    #[serde(default = "default_eviction_threshold")]
    pub eviction_threshold_percent: f64,

    #[serde(default)]
    pub scoring_formula: ScoringFormula,

    #[serde(default = "default_system_namespaces")]
    pub system_namespaces: Vec<String>,

    #[serde(default = "default_agent_discovery_interval")]
    pub agent_discovery_interval_secs: u64,

    #[serde(default = "default_watch_max_backoff")]
    pub watch_max_backoff_secs: u64,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "analysis-engine".to_string())
}

fn default_tick_interval() -> u64 {
    5
}

fn default_score_port() -> u16 {
    50051
}

fn default_api_port() -> u16 {
    8080
}

fn default_agent_port() -> u16 {
    9444
}

fn default_agent_namespace() -> String {
    "keti-system".to_string()
}

fn default_agent_label_selector() -> String {
    "name=metric-collector".to_string()
}

fn default_fetch_timeout() -> u64 {
    1000
}

fn default_max_concurrent_fetches() -> usize {
    16
}

fn default_eviction_threshold() -> f64 {
    50.0
}

fn default_system_namespaces() -> Vec<String> {
    DEFAULT_SYSTEM_NAMESPACES
        .iter()
        .map(|ns| ns.to_string())
        .collect()
}

fn default_agent_discovery_interval() -> u64 {
    60
}

fn default_watch_max_backoff() -> u64 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            tick_interval_secs: default_tick_interval(),
            score_port: default_score_port(),
            api_port: default_api_port(),
            agent_port: default_agent_port(),
            agent_namespace: default_agent_namespace(),
            agent_label_selector: default_agent_label_selector(),
            fetch_timeout_ms: default_fetch_timeout(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            eviction_threshold_percent: default_eviction_threshold(),
            scoring_formula: ScoringFormula::default(),
            system_namespaces: default_system_namespaces(),
            agent_discovery_interval_secs: default_agent_discovery_interval(),
            watch_max_backoff_secs: default_watch_max_backoff(),
        }
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("system_namespaces")
}

impl EngineConfig {
    /// Load from `ENGINE_CONFIG` (if set) and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from);
        Self::from_sources(file.as_deref(), environment())
    }

    /// Layer `env` over an optional required config file, then validate
    pub fn from_sources(
        file: Option<&Path>,
        env: config::Environment,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: EngineConfig = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("tick_interval_secs", self.tick_interval_secs),
            ("fetch_timeout_ms", self.fetch_timeout_ms),
            ("max_concurrent_fetches", self.max_concurrent_fetches as u64),
            ("agent_discovery_interval_secs", self.agent_discovery_interval_secs),
            ("watch_max_backoff_secs", self.watch_max_backoff_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
        }

        let threshold = self.eviction_threshold_percent;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "eviction_threshold_percent must be a non-negative number, got {}",
                threshold
            )));
        }

        if self.agent_namespace.trim().is_empty() || self.agent_label_selector.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "agent_namespace and agent_label_selector must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn agent_discovery_interval(&self) -> Duration {
        Duration::from_secs(self.agent_discovery_interval_secs)
    }

    pub fn watch_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            max: Duration::from_secs(self.watch_max_backoff_secs),
            ..BackoffConfig::default()
        }
    }

    pub fn namespace_filter(&self) -> NamespaceFilter {
        NamespaceFilter::new(self.system_namespaces.iter().map(|ns| ns.trim().to_string()))
    }

    pub fn agent_locator(&self) -> AgentLocator {
        AgentLocator {
            namespace: self.agent_namespace.clone(),
            label_selector: self.agent_label_selector.clone(),
            port: self.agent_port,
        }
    }

    pub fn remediation_policy(&self) -> RemediationPolicy {
        RemediationPolicy::new(self.eviction_threshold_percent)
    }

    pub fn score_weights(&self) -> ScoreWeights {
        self.scoring_formula.weights()
    }
}
