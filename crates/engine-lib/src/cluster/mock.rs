//! In-memory [`ClusterApi`] for tests

use super::{ClusterApi, ClusterError, DeploymentEvent, PodEvent, ResourceEvent, WatchStream};
use crate::models::{DeploymentInfo, NodeCapacity, NodeInfo, PodInfo, PodKey};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn running_pod(namespace: &str, name: &str, node: &str) -> PodInfo {
    PodInfo {
        name: name.to_string(),
        namespace: namespace.to_string(),
        node_name: Some(node.to_string()),
        phase: Some("Running".to_string()),
        pod_ip: Some(format!("10.0.{}.{}", node.len(), name.len())),
    }
}

pub fn agent_pod(node: &str, ip: &str) -> PodInfo {
    PodInfo {
        name: format!("metric-collector-{}", node),
        namespace: "keti-system".to_string(),
        node_name: Some(node.to_string()),
        phase: Some("Running".to_string()),
        pod_ip: Some(ip.to_string()),
    }
}

pub fn deployment(namespace: &str, name: &str) -> DeploymentInfo {
    DeploymentInfo {
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

/// Scripted watch: each `watch_*` call pops one script. When no script is
/// left the returned stream never yields.
type Script<T> = Mutex<VecDeque<Vec<Result<ResourceEvent<T>, ClusterError>>>>;

#[derive(Default)]
pub struct MockCluster {
    nodes: Mutex<Vec<NodeInfo>>,
    pods: Mutex<Vec<PodInfo>>,
    agents: Mutex<Vec<PodInfo>>,
    deployments: Mutex<Vec<DeploymentInfo>>,
    fail_lists: AtomicBool,
    delete_failures: Mutex<HashMap<PodKey, usize>>,
    deleted: Mutex<Vec<PodKey>>,
    deployment_watches: Script<DeploymentInfo>,
    agent_watches: Script<PodInfo>,
    watch_opens: AtomicUsize,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_nodes(&self, names: &[&str]) {
        *self.nodes.lock().unwrap() = names
            .iter()
            .map(|name| NodeInfo {
                name: name.to_string(),
            })
            .collect();
    }

    pub fn set_pods(&self, pods: Vec<PodInfo>) {
        *self.pods.lock().unwrap() = pods;
    }

    pub fn set_agents(&self, agents: Vec<PodInfo>) {
        *self.agents.lock().unwrap() = agents;
    }

    pub fn set_deployments(&self, deployments: Vec<DeploymentInfo>) {
        *self.deployments.lock().unwrap() = deployments;
    }

    /// Make every list call fail until reset
    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `times` deletions of a pod
    pub fn fail_deletes(&self, key: PodKey, times: usize) {
        self.delete_failures.lock().unwrap().insert(key, times);
    }

    pub fn deleted(&self) -> Vec<PodKey> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn script_deployment_watch(&self, events: Vec<Result<DeploymentEvent, ClusterError>>) {
        self.deployment_watches.lock().unwrap().push_back(events);
    }

    pub fn script_agent_watch(&self, events: Vec<Result<PodEvent, ClusterError>>) {
        self.agent_watches.lock().unwrap().push_back(events);
    }

    pub fn watch_opens(&self) -> usize {
        self.watch_opens.load(Ordering::SeqCst)
    }

    fn check_lists(&self) -> Result<(), ClusterError> {
        if self.fail_lists.load(Ordering::SeqCst) {
            Err(ClusterError::Unavailable("mock API down".to_string()))
        } else {
            Ok(())
        }
    }

    fn open<T: Send + 'static>(&self, script: &Script<T>) -> WatchStream<T> {
        self.watch_opens.fetch_add(1, Ordering::SeqCst);
        match script.lock().unwrap().pop_front() {
            Some(events) => stream::iter(events).boxed(),
            None => stream::pending().boxed(),
        }
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        self.check_lists()?;
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn node_capacity(&self, _node_name: &str) -> Result<NodeCapacity, ClusterError> {
        Ok(NodeCapacity {
            cpu_cores: Some(4.0),
            memory_bytes: Some(8 * 1024 * 1024 * 1024),
            ephemeral_storage_bytes: None,
        })
    }

    async fn list_pods(&self) -> Result<Vec<PodInfo>, ClusterError> {
        self.check_lists()?;
        Ok(self.pods.lock().unwrap().clone())
    }

    async fn list_pods_by_label(
        &self,
        _namespace: &str,
        _label_selector: &str,
    ) -> Result<Vec<PodInfo>, ClusterError> {
        self.check_lists()?;
        Ok(self.agents.lock().unwrap().clone())
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        _grace_period_secs: u32,
    ) -> Result<(), ClusterError> {
        let key = PodKey::new(namespace, name);

        if let Some(remaining) = self.delete_failures.lock().unwrap().get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClusterError::Unavailable("delete rejected".to_string()));
            }
        }

        self.pods
            .lock()
            .unwrap()
            .retain(|pod| pod.key() != key);
        self.deleted.lock().unwrap().push(key);
        Ok(())
    }

    async fn list_deployments(&self) -> Result<Vec<DeploymentInfo>, ClusterError> {
        self.check_lists()?;
        Ok(self.deployments.lock().unwrap().clone())
    }

    async fn watch_deployments(&self) -> Result<WatchStream<DeploymentInfo>, ClusterError> {
        Ok(self.open(&self.deployment_watches))
    }

    async fn watch_pods_by_label(
        &self,
        _namespace: &str,
        _label_selector: &str,
    ) -> Result<WatchStream<PodInfo>, ClusterError> {
        Ok(self.open(&self.agent_watches))
    }
}
