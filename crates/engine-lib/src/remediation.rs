//! Threshold-triggered pod eviction policy

use crate::models::UsageSnapshot;
use serde::Serialize;

/// Pods are deleted without a grace period.
pub const EVICTION_GRACE_PERIOD_SECS: u32 = 0;

/// Usage dimensions the eviction policy inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Cpu,
    Memory,
    Storage,
}

/// Evicts a pod when any of CPU, memory or storage utilization exceeds a
/// fixed percentage. Unknown dimensions never trigger eviction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemediationPolicy {
    threshold_percent: f64,
}

impl RemediationPolicy {
    pub fn new(threshold_percent: f64) -> Self {
        Self { threshold_percent }
    }

    pub fn threshold_percent(&self) -> f64 {
        self.threshold_percent
    }

    /// Dimensions strictly above the threshold
    pub fn breaches(&self, usage: &UsageSnapshot) -> Vec<Dimension> {
        [
            (Dimension::Cpu, usage.cpu_percent),
            (Dimension::Memory, usage.memory_percent),
            (Dimension::Storage, usage.storage_percent),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_some_and(|v| v > self.threshold_percent))
        .map(|(dimension, _)| dimension)
        .collect()
    }

    pub fn should_evict(&self, usage: &UsageSnapshot) -> bool {
        !self.breaches(usage).is_empty()
    }
}

impl Default for RemediationPolicy {
    fn default() -> Self {
        Self::new(50.0)
    }
}

/// Result of acting on one pod in a tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionOutcome {
    Evicted,
    /// Deletion failed; the pod stays a candidate for the next tick.
    Failed(String),
}
