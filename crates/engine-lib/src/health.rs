//! Component health tracking for liveness and readiness probes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Operating on stale or partial data
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }

    fn severity(&self) -> u8 {
        match self {
            ComponentStatus::Healthy => 0,
            ComponentStatus::Degraded => 1,
            ComponentStatus::Unhealthy => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Overall health: the worst status of any component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|health| health.status)
            .max_by_key(ComponentStatus::severity)
            .unwrap_or(ComponentStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Tracked component names
pub mod components {
    pub const CONTROL_LOOP: &str = "control_loop";
    pub const SCORE_SERVER: &str = "score_server";
    pub const DEPLOYMENT_WATCH: &str = "deployment_watch";
    pub const AGENT_WATCH: &str = "agent_watch";

    pub const ALL: &[&str] = &[CONTROL_LOOP, SCORE_SERVER, DEPLOYMENT_WATCH, AGENT_WATCH];
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared, cloneable view of engine health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register components as healthy
    pub async fn register_all(&self, names: &[&str]) {
        let mut state = self.state.write().await;
        for name in names {
            state
                .components
                .insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn status_of(&self, name: &str) -> Option<ComponentStatus> {
        self.state
            .read()
            .await
            .components
            .get(name)
            .map(|health| health.status)
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        HealthResponse {
            status: HealthResponse::compute_status(&components),
            components,
        }
    }

    /// Ready once initialized and while no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        if !state.ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("Engine not yet initialized".to_string()),
            };
        }

        let unhealthy: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, health)| !health.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();

        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy components: {}", unhealthy.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_register_all_components() {
        let registry = HealthRegistry::new();
        registry.register_all(components::ALL).await;

        let health = registry.health().await;
        assert_eq!(health.components.len(), 4);
        assert_eq!(
            registry.status_of(components::SCORE_SERVER).await,
            Some(ComponentStatus::Healthy)
        );
    }

    #[tokio::test]
    async fn test_worst_component_wins() {
        let registry = HealthRegistry::new();
        registry.register_all(components::ALL).await;

        registry
            .set_degraded(components::DEPLOYMENT_WATCH, "watch closed, reconnecting")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(components::SCORE_SERVER, "listener closed")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness_lifecycle() {
        let registry = HealthRegistry::new();
        registry.register_all(components::ALL).await;
        assert!(!registry.readiness().await.ready);

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        // degraded components keep the engine ready
        registry
            .set_degraded(components::AGENT_WATCH, "reconnecting")
            .await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(components::SCORE_SERVER, "listener closed")
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.unwrap().contains(components::SCORE_SERVER));
    }
}
