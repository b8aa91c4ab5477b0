//! Control loop
//!
//! Once per tick the engine drains agent endpoint updates, refreshes the
//! topology, fetches and scores node metrics, publishes the score map,
//! evaluates pods against the remediation policy and reports deployment
//! churn. Ticks never overlap; a tick that overruns the interval is
//! followed immediately by the next one.

mod scores;

pub use scores::{score_board, ScoreBoard, ScoreMap, ScoreReader};

use crate::churn::FlaggedDeployments;
use crate::cluster::ClusterApi;
use crate::collector::{CounterTracker, FetchError, MetricReading, MetricSource, MetricTarget};
use crate::config::EngineConfig;
use crate::health::{components, HealthRegistry};
use crate::models::{NodeRecord, NodeScore, PodKey, PodRecord};
use crate::observability::{EngineMetrics, StructuredLogger, TickCounts};
use crate::remediation::{EvictionOutcome, RemediationPolicy, EVICTION_GRACE_PERIOD_SECS};
use crate::scoring::{score, Level, ScoreWeights};
use crate::topology::{
    AgentDirectory, AgentLocator, AgentUpdate, NamespaceFilter, TopologyTracker,
};
use anyhow::Result;
use chrono::Utc;
use futures::{stream, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Tunables of the control loop
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub tick_interval: Duration,
    pub discovery_interval: Duration,
    pub max_concurrent_fetches: usize,
    pub policy: RemediationPolicy,
    pub weights: ScoreWeights,
    pub locator: AgentLocator,
    pub filter: NamespaceFilter,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            discovery_interval: config.agent_discovery_interval(),
            max_concurrent_fetches: config.max_concurrent_fetches.max(1),
            policy: config.remediation_policy(),
            weights: config.score_weights(),
            locator: config.agent_locator(),
            filter: config.namespace_filter(),
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub nodes_tracked: usize,
    pub nodes_scored: usize,
    pub node_fetch_failures: usize,
    pub pods_checked: usize,
    pub pod_fetch_failures: usize,
    pub overloaded: Vec<PodKey>,
    pub evicted: Vec<PodKey>,
    pub eviction_failures: Vec<PodKey>,
    pub deployments_detected: usize,
    pub flagged_deployments: Vec<String>,
    /// A topology list call failed and the previous snapshot was used
    pub topology_stale: bool,
}

impl TickReport {
    fn counts(&self) -> TickCounts {
        TickCounts {
            nodes_tracked: self.nodes_tracked,
            nodes_scored: self.nodes_scored,
            node_fetch_failures: self.node_fetch_failures,
            pods_checked: self.pods_checked,
            pod_fetch_failures: self.pod_fetch_failures,
            evicted: self.evicted.len(),
            eviction_failures: self.eviction_failures.len(),
            deployments_flagged: self.flagged_deployments.len(),
        }
    }
}

type FetchResults = Vec<(MetricTarget, Result<MetricReading, FetchError>)>;

pub struct Engine {
    cluster: Arc<dyn ClusterApi>,
    source: Arc<dyn MetricSource>,
    settings: EngineSettings,
    topology: TopologyTracker,
    agents: AgentDirectory,
    agent_updates: Option<mpsc::UnboundedReceiver<AgentUpdate>>,
    last_discovery: Option<Instant>,
    churn: Option<watch::Receiver<FlaggedDeployments>>,
    counters: CounterTracker,
    nodes: BTreeMap<String, NodeRecord>,
    pods: BTreeMap<PodKey, PodRecord>,
    scores: ScoreBoard,
    metrics: EngineMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl Engine {
    pub fn nodes(&self) -> &BTreeMap<String, NodeRecord> {
        &self.nodes
    }

    pub fn pods(&self) -> &BTreeMap<PodKey, PodRecord> {
        &self.pods
    }

    pub fn agents(&self) -> &AgentDirectory {
        &self.agents
    }

    pub fn topology(&self) -> &TopologyTracker {
        &self.topology
    }

    /// Tick forever
    pub async fn run(mut self) {
        info!(
            tick_interval_secs = self.settings.tick_interval.as_secs_f64(),
            max_concurrent_fetches = self.settings.max_concurrent_fetches,
            eviction_threshold_percent = self.settings.policy.threshold_percent(),
            "Starting control loop"
        );

        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        self.sync_agents().await;
        report.topology_stale = !self.refresh_topology().await;

        self.collect_nodes(&mut report).await;
        self.publish_scores(&mut report);
        self.remediate_pods(&mut report).await;
        self.report_deployments(&mut report).await;

        let live: HashSet<MetricTarget> = self
            .nodes
            .keys()
            .map(|name| MetricTarget::Node(name.clone()))
            .chain(self.pods.keys().map(|key| MetricTarget::Pod(key.clone())))
            .collect();
        self.counters.retain(&live);

        report.nodes_tracked = self.nodes.len();
        self.metrics.set_tracked(self.nodes.len(), self.pods.len());
        self.metrics.set_nodes_scored(report.nodes_scored);

        let elapsed = started.elapsed();
        self.metrics.observe_tick_duration(elapsed.as_secs_f64());

        let members: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        let flagged: Vec<&str> = report
            .flagged_deployments
            .iter()
            .map(String::as_str)
            .collect();
        self.logger
            .log_tick_summary(&report.counts(), &members, &flagged, elapsed.as_millis());

        if report.topology_stale {
            self.health
                .set_degraded(components::CONTROL_LOOP, "cluster list failed, using last topology")
                .await;
        } else {
            self.health.set_healthy(components::CONTROL_LOOP).await;
        }

        report
    }

    /// Apply watched agent changes, then run a full discovery when due
    async fn sync_agents(&mut self) {
        if let Some(updates) = self.agent_updates.as_mut() {
            while let Ok(update) = updates.try_recv() {
                debug!(update = ?update, "Applying metric agent update");
                self.agents.apply(update);
            }
        }

        let due = self
            .last_discovery
            .map_or(true, |at| at.elapsed() >= self.settings.discovery_interval);
        if !due {
            return;
        }

        match self
            .agents
            .discover(self.cluster.as_ref(), &self.settings.locator)
            .await
        {
            Ok(found) => {
                debug!(agents = found, "Metric agent discovery complete");
                self.last_discovery = Some(Instant::now());
            }
            Err(e) => warn!(
                error = %e,
                known_agents = self.agents.len(),
                "Metric agent discovery failed, keeping last known endpoints"
            ),
        }
    }

    /// Returns false when either list call failed
    async fn refresh_topology(&mut self) -> bool {
        let mut fresh = true;

        match self.topology.refresh_nodes().await {
            Ok(summary) => {
                for node in &summary.joined {
                    let capacity = match self.cluster.node_capacity(node).await {
                        Ok(capacity) => Some(capacity),
                        Err(e) => {
                            debug!(node = %node, error = %e, "Node capacity unavailable");
                            None
                        }
                    };
                    self.logger.log_node_joined(node, capacity.as_ref());
                }
                for node in &summary.departed {
                    self.logger.log_node_departed(node);
                }
            }
            Err(e) => {
                fresh = false;
                warn!(error = %e, "Node refresh failed, keeping previous node set");
            }
        }

        match self.topology.refresh_pods().await {
            Ok(summary) => debug!(
                joined = summary.joined.len(),
                departed = summary.departed.len(),
                "Pod set refreshed"
            ),
            Err(e) => {
                fresh = false;
                warn!(error = %e, "Pod refresh failed, keeping previous pod set");
            }
        }

        fresh
    }

    fn endpoint_for_node(&self, node: Option<&str>) -> Option<String> {
        node.and_then(|node| self.agents.endpoint_for(node))
            .map(|endpoint| endpoint.address.clone())
    }

    /// Fetch all targets with bounded parallelism, sorted by target
    async fn fetch_all(&self, targets: Vec<(MetricTarget, Option<String>)>) -> FetchResults {
        let source = &self.source;

        let mut results: FetchResults = stream::iter(targets)
            .map(|(target, endpoint)| async move {
                let result = match endpoint {
                    Some(endpoint) => source.fetch(&endpoint, &target).await,
                    None => Err(FetchError::NoEndpoint(target.to_string())),
                };
                (target, result)
            })
            .buffer_unordered(self.settings.max_concurrent_fetches)
            .collect()
            .await;

        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    async fn collect_nodes(&mut self, report: &mut TickReport) {
        let targets = self
            .topology
            .nodes()
            .keys()
            .map(|name| {
                (
                    MetricTarget::Node(name.clone()),
                    self.endpoint_for_node(Some(name)),
                )
            })
            .collect();
        let results = self.fetch_all(targets).await;
        let now = Utc::now();

        // Records are rebuilt from the current node set; vanished nodes drop out.
        let mut next = BTreeMap::new();
        for (name, tracked) in self.topology.nodes() {
            let mut record = self
                .nodes
                .remove(name)
                .unwrap_or_else(|| NodeRecord::new(name.clone(), tracked.last_seen));
            record.last_seen = tracked.last_seen;
            record.agent_address = self
                .agents
                .endpoint_for(name)
                .map(|endpoint| endpoint.address.clone());
            next.insert(name.clone(), record);
        }

        for (target, result) in results {
            let MetricTarget::Node(name) = &target else {
                continue;
            };
            let Some(record) = next.get_mut(name) else {
                continue;
            };

            match result {
                Ok(reading) => {
                    let usage = self.counters.snapshot(&target, &reading, now);
                    record.usage = Some(usage);

                    match score(&usage, &self.settings.weights) {
                        Some(value) => {
                            let level = Level::from_score(value);
                            record.score = Some(value);
                            record.level = Some(level);
                            self.logger.log_node_score(name, value, level);
                        }
                        None => self.logger.log_score_retained(
                            name,
                            record.score,
                            "weighted dimension not reported",
                        ),
                    }
                }
                Err(e) => {
                    report.node_fetch_failures += 1;
                    self.metrics.inc_fetch_errors(&target);
                    self.logger.log_fetch_failure(&target, &e);
                    if record.score.is_some() {
                        self.logger
                            .log_score_retained(name, record.score, "metric fetch failed");
                    }
                }
            }
        }

        self.nodes = next;
    }

    fn publish_scores(&mut self, report: &mut TickReport) {
        let scores: ScoreMap = self
            .nodes
            .values()
            .filter_map(|record| {
                Some((
                    record.name.clone(),
                    NodeScore {
                        score: record.score?,
                        level: record.level?,
                    },
                ))
            })
            .collect();

        report.nodes_scored = scores.len();
        self.scores.publish(scores);
    }

    async fn remediate_pods(&mut self, report: &mut TickReport) {
        let targets: Vec<_> = self
            .topology
            .pods()
            .iter()
            .map(|(key, pod)| {
                (
                    MetricTarget::Pod(key.clone()),
                    self.endpoint_for_node(pod.node_name.as_deref()),
                )
            })
            .collect();
        report.pods_checked = targets.len();
        let results = self.fetch_all(targets).await;
        let now = Utc::now();

        let mut next = BTreeMap::new();
        for (key, tracked) in self.topology.pods() {
            let mut record = self.pods.remove(key).unwrap_or_else(|| PodRecord {
                key: key.clone(),
                node_name: tracked.node_name.clone(),
                last_seen: tracked.seen.last_seen,
                usage: None,
            });
            record.node_name = tracked.node_name.clone();
            record.last_seen = tracked.seen.last_seen;
            next.insert(key.clone(), record);
        }

        let mut candidates = Vec::new();
        for (target, result) in results {
            let MetricTarget::Pod(key) = &target else {
                continue;
            };

            match result {
                Ok(reading) => {
                    let usage = self.counters.snapshot(&target, &reading, now);
                    if let Some(record) = next.get_mut(key) {
                        record.usage = Some(usage);
                    }

                    let breaches = self.settings.policy.breaches(&usage);
                    if !breaches.is_empty() {
                        self.logger.log_overloaded_pod(key, &usage, &breaches);
                        candidates.push(key.clone());
                    }
                }
                Err(e) => {
                    report.pod_fetch_failures += 1;
                    self.metrics.inc_fetch_errors(&target);
                    self.logger.log_fetch_failure(&target, &e);
                }
            }
        }
        self.pods = next;

        for key in candidates {
            let outcome = match self
                .cluster
                .delete_pod(&key.namespace, &key.name, EVICTION_GRACE_PERIOD_SECS)
                .await
            {
                Ok(()) => {
                    self.topology.forget_pod(&key);
                    self.pods.remove(&key);
                    self.metrics.inc_evictions();
                    report.evicted.push(key.clone());
                    EvictionOutcome::Evicted
                }
                Err(e) => {
                    // stays tracked, so the next tick re-evaluates it
                    self.metrics.inc_eviction_failures();
                    report.eviction_failures.push(key.clone());
                    EvictionOutcome::Failed(e.to_string())
                }
            };

            self.logger.log_eviction(&key, &outcome);
            report.overloaded.push(key);
        }
    }

    async fn report_deployments(&mut self, report: &mut TickReport) {
        match self.cluster.list_deployments().await {
            Ok(deployments) => {
                let detected: Vec<_> = deployments
                    .into_iter()
                    .filter(|d| !self.settings.filter.is_system(&d.namespace))
                    .collect();
                report.deployments_detected = detected.len();
                self.logger.log_detected_deployments(&detected);
            }
            Err(e) => warn!(error = %e, "Deployment list failed"),
        }

        let flagged = self
            .churn
            .as_ref()
            .map(|rx| rx.borrow().clone())
            .unwrap_or_default();
        report.flagged_deployments = flagged.iter().cloned().collect();
    }
}

/// Builder for the control loop
pub struct EngineBuilder {
    cluster: Option<Arc<dyn ClusterApi>>,
    source: Option<Arc<dyn MetricSource>>,
    settings: EngineSettings,
    agent_updates: Option<mpsc::UnboundedReceiver<AgentUpdate>>,
    churn: Option<watch::Receiver<FlaggedDeployments>>,
    metrics: Option<EngineMetrics>,
    logger: Option<StructuredLogger>,
    health: Option<HealthRegistry>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            cluster: None,
            source: None,
            settings: EngineSettings::default(),
            agent_updates: None,
            churn: None,
            metrics: None,
            logger: None,
            health: None,
        }
    }

    pub fn cluster(mut self, cluster: Arc<dyn ClusterApi>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn metric_source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Receive endpoint changes from an [`crate::topology::AgentWatch`]
    pub fn agent_updates(mut self, updates: mpsc::UnboundedReceiver<AgentUpdate>) -> Self {
        self.agent_updates = Some(updates);
        self
    }

    /// Report the flag set published by a [`crate::churn::ChurnWatcher`]
    pub fn churn(mut self, churn: watch::Receiver<FlaggedDeployments>) -> Self {
        self.churn = Some(churn);
        self
    }

    pub fn metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<(Engine, ScoreReader)> {
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow::anyhow!("Cluster API is required"))?;
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Metric source is required"))?;
        let (scores, reader) = score_board();

        let engine = Engine {
            topology: TopologyTracker::new(cluster.clone(), self.settings.filter.clone()),
            cluster,
            source,
            settings: self.settings,
            agents: AgentDirectory::new(),
            agent_updates: self.agent_updates,
            last_discovery: None,
            churn: self.churn,
            counters: CounterTracker::new(),
            nodes: BTreeMap::new(),
            pods: BTreeMap::new(),
            scores,
            metrics: self.metrics.unwrap_or_default(),
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new("analysis-engine")),
            health: self.health.unwrap_or_default(),
        };

        Ok((engine, reader))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
