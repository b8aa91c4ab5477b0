//! Observability infrastructure for the analysis engine
//!
//! Provides:
//! - Prometheus metrics (tick latency, tracked entities, fetch errors, evictions, watch reconnects)
//! - Structured JSON logging with tracing

use crate::collector::{FetchError, MetricTarget};
use crate::models::{DeploymentInfo, NodeCapacity, PodKey, UsageSnapshot};
use crate::remediation::{Dimension, EvictionOutcome};
use crate::scoring::Level;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Tick durations range from a few milliseconds to several fetch timeouts
const TICK_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    tick_duration_seconds: Histogram,
    nodes_tracked: IntGauge,
    nodes_scored: IntGauge,
    pods_tracked: IntGauge,
    metric_fetch_errors: IntCounterVec,
    evictions: IntCounter,
    eviction_failures: IntCounter,
    deployments_flagged: IntGauge,
    watch_reconnects: IntCounterVec,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            tick_duration_seconds: register_histogram!(
                "analysis_engine_tick_duration_seconds",
                "Time spent in one control loop tick",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            nodes_tracked: register_int_gauge!(
                "analysis_engine_nodes_tracked",
                "Nodes in the current topology snapshot"
            )
            .expect("Failed to register nodes_tracked"),

            nodes_scored: register_int_gauge!(
                "analysis_engine_nodes_scored",
                "Nodes with a published score"
            )
            .expect("Failed to register nodes_scored"),

            pods_tracked: register_int_gauge!(
                "analysis_engine_pods_tracked",
                "Running pods outside system namespaces"
            )
            .expect("Failed to register pods_tracked"),

            metric_fetch_errors: register_int_counter_vec!(
                "analysis_engine_metric_fetch_errors_total",
                "Failed metric agent requests",
                &["target"]
            )
            .expect("Failed to register metric_fetch_errors"),

            evictions: register_int_counter!(
                "analysis_engine_evictions_total",
                "Pods deleted for exceeding the utilization threshold"
            )
            .expect("Failed to register evictions"),

            eviction_failures: register_int_counter!(
                "analysis_engine_eviction_failures_total",
                "Pod deletions that failed and will be retried"
            )
            .expect("Failed to register eviction_failures"),

            deployments_flagged: register_int_gauge!(
                "analysis_engine_deployments_flagged",
                "Deployments currently flagged as recently restarted"
            )
            .expect("Failed to register deployments_flagged"),

            watch_reconnects: register_int_counter_vec!(
                "analysis_engine_watch_reconnects_total",
                "Watch streams re-established after closing or failing",
                &["component"]
            )
            .expect("Failed to register watch_reconnects"),
        }
    }
}

/// Handle to the process-wide engine metrics. Clones share the same
/// registered collectors.
#[derive(Clone)]
pub struct EngineMetrics {
    inner: &'static EngineMetricsInner,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(EngineMetricsInner::new),
        }
    }

    pub fn observe_tick_duration(&self, duration_secs: f64) {
        self.inner.tick_duration_seconds.observe(duration_secs);
    }

    pub fn set_tracked(&self, nodes: usize, pods: usize) {
        self.inner.nodes_tracked.set(nodes as i64);
        self.inner.pods_tracked.set(pods as i64);
    }

    pub fn set_nodes_scored(&self, count: usize) {
        self.inner.nodes_scored.set(count as i64);
    }

    pub fn inc_fetch_errors(&self, target: &MetricTarget) {
        let label = match target {
            MetricTarget::Node(_) => "node",
            MetricTarget::Pod(_) => "pod",
        };
        self.inner
            .metric_fetch_errors
            .with_label_values(&[label])
            .inc();
    }

    pub fn inc_evictions(&self) {
        self.inner.evictions.inc();
    }

    pub fn inc_eviction_failures(&self) {
        self.inner.eviction_failures.inc();
    }

    pub fn set_deployments_flagged(&self, count: usize) {
        self.inner.deployments_flagged.set(count as i64);
    }

    pub fn inc_watch_reconnects(&self, component: &str) {
        self.inner
            .watch_reconnects
            .with_label_values(&[component])
            .inc();
    }
}

/// Counts reported at the end of every tick
#[derive(Debug, Clone, Copy, Default)]
pub struct TickCounts {
    pub nodes_tracked: usize,
    pub nodes_scored: usize,
    pub node_fetch_failures: usize,
    pub pods_checked: usize,
    pub pod_fetch_failures: usize,
    pub evicted: usize,
    pub eviction_failures: usize,
    pub deployments_flagged: usize,
}

/// Structured logger for engine events
///
/// Every record carries an `event` tag and the engine instance name so
/// console output can be filtered and aggregated.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str, formula: &str) {
        info!(
            event = "engine_started",
            instance = %self.instance,
            engine_version = %version,
            scoring_formula = %formula,
            "Analysis engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Analysis engine shutting down"
        );
    }

    /// Node entered the topology. Capacity is `None` when it could not be read.
    pub fn log_node_joined(&self, node: &str, capacity: Option<&NodeCapacity>) {
        match capacity {
            Some(capacity) => info!(
                event = "node_joined",
                instance = %self.instance,
                node = %node,
                cpu_cores = ?capacity.cpu_cores,
                memory_bytes = ?capacity.memory_bytes,
                ephemeral_storage_bytes = ?capacity.ephemeral_storage_bytes,
                "Node joined"
            ),
            None => info!(
                event = "node_joined",
                instance = %self.instance,
                node = %node,
                "Node joined, capacity unknown"
            ),
        }
    }

    pub fn log_node_departed(&self, node: &str) {
        info!(
            event = "node_departed",
            instance = %self.instance,
            node = %node,
            "Node left the cluster"
        );
    }

    pub fn log_node_score(&self, node: &str, score: f64, level: Level) {
        info!(
            event = "node_score",
            instance = %self.instance,
            node = %node,
            score = score,
            level = level.value(),
            "Node scored"
        );
    }

    /// Score kept from the previous tick
    pub fn log_score_retained(&self, node: &str, previous: Option<f64>, reason: &str) {
        warn!(
            event = "node_score_retained",
            instance = %self.instance,
            node = %node,
            previous_score = ?previous,
            reason = %reason,
            "Keeping previous node score"
        );
    }

    pub fn log_fetch_failure(&self, target: &MetricTarget, error: &FetchError) {
        warn!(
            event = "metric_fetch_failed",
            instance = %self.instance,
            target = %target,
            error = %error,
            "Metric fetch failed, skipping for this tick"
        );
    }

    pub fn log_overloaded_pod(&self, pod: &PodKey, usage: &UsageSnapshot, breaches: &[Dimension]) {
        warn!(
            event = "pod_overloaded",
            instance = %self.instance,
            namespace = %pod.namespace,
            pod_name = %pod.name,
            cpu_percent = ?usage.cpu_percent,
            memory_percent = ?usage.memory_percent,
            storage_percent = ?usage.storage_percent,
            network_tx_rate = ?usage.network_tx_rate,
            network_rx_rate = ?usage.network_rx_rate,
            breaches = ?breaches,
            "Pod over utilization threshold"
        );
    }

    pub fn log_eviction(&self, pod: &PodKey, outcome: &EvictionOutcome) {
        match outcome {
            EvictionOutcome::Evicted => info!(
                event = "pod_evicted",
                instance = %self.instance,
                namespace = %pod.namespace,
                pod_name = %pod.name,
                "Pod deleted"
            ),
            EvictionOutcome::Failed(error) => warn!(
                event = "pod_eviction_failed",
                instance = %self.instance,
                namespace = %pod.namespace,
                pod_name = %pod.name,
                error = %error,
                "Pod deletion failed, will retry next tick"
            ),
        }
    }

    pub fn log_deployment_restart(&self, deployment: &DeploymentInfo) {
        info!(
            event = "deployment_restarted",
            instance = %self.instance,
            namespace = %deployment.namespace,
            deployment = %deployment.name,
            "Deployment flagged as restarted"
        );
    }

    pub fn log_deployment_removed(&self, deployment: &DeploymentInfo) {
        info!(
            event = "deployment_removed",
            instance = %self.instance,
            namespace = %deployment.namespace,
            deployment = %deployment.name,
            "Deployment flag cleared"
        );
    }

    pub fn log_detected_deployments(&self, deployments: &[DeploymentInfo]) {
        let names: Vec<String> = deployments
            .iter()
            .map(|d| format!("{}/{}", d.namespace, d.name))
            .collect();
        let detected = if names.is_empty() {
            "None".to_string()
        } else {
            names.join(", ")
        };

        info!(
            event = "deployments_detected",
            instance = %self.instance,
            count = deployments.len(),
            deployments = %detected,
            "Detected deployments"
        );
    }

    pub fn log_tick_summary(
        &self,
        counts: &TickCounts,
        members: &[&str],
        flagged: &[&str],
        elapsed_ms: u128,
    ) {
        info!(
            event = "tick_complete",
            instance = %self.instance,
            nodes_tracked = counts.nodes_tracked,
            nodes_scored = counts.nodes_scored,
            node_fetch_failures = counts.node_fetch_failures,
            pods_checked = counts.pods_checked,
            pod_fetch_failures = counts.pod_fetch_failures,
            evicted = counts.evicted,
            eviction_failures = counts.eviction_failures,
            deployments_flagged = counts.deployments_flagged,
            members = %members.join(", "),
            flagged_deployments = %flagged.join(", "),
            elapsed_ms = elapsed_ms as u64,
            "Control loop tick complete"
        );
    }
}
