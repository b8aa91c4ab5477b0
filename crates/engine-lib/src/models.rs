//! Core data models for the analysis engine

use crate::scoring::Level;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespaced pod identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

impl PodKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A cluster node as returned by the cluster API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
}

/// A pod as returned by the cluster API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub node_name: Option<String>,
    pub phase: Option<String>,
    pub pod_ip: Option<String>,
}

impl PodInfo {
    pub fn key(&self) -> PodKey {
        PodKey::new(&self.namespace, &self.name)
    }

    pub fn is_running(&self) -> bool {
        self.phase.as_deref() == Some("Running")
    }
}

/// A deployment as returned by the cluster API
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub name: String,
    pub namespace: String,
}

/// Allocatable-independent node capacity. Absent quantities are unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub cpu_cores: Option<f64>,
    pub memory_bytes: Option<u64>,
    pub ephemeral_storage_bytes: Option<u64>,
}

/// Resource usage of a node or pod at one point in time
///
/// Utilizations are percentages of capacity as normalized by the metric
/// agent. `None` means the agent did not report the dimension, which is
/// never the same as zero. Network rates are bytes since the previous
/// sample of the same entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub storage_percent: Option<f64>,
    pub network_percent: Option<f64>,
    pub network_tx_rate: Option<f64>,
    pub network_rx_rate: Option<f64>,
    pub collected_at: DateTime<Utc>,
}

/// Per-node state owned by the control loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub last_seen: DateTime<Utc>,
    pub agent_address: Option<String>,
    pub usage: Option<UsageSnapshot>,
    pub score: Option<f64>,
    pub level: Option<Level>,
}

impl NodeRecord {
    pub fn new(name: impl Into<String>, last_seen: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            last_seen,
            agent_address: None,
            usage: None,
            score: None,
            level: None,
        }
    }
}

/// Per-pod state owned by the control loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodRecord {
    pub key: PodKey,
    pub node_name: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub usage: Option<UsageSnapshot>,
}

/// Published score for one node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeScore {
    pub score: f64,
    pub level: Level,
}
