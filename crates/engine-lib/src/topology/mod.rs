//! Cluster topology tracking
//!
//! Keeps the current node and pod sets, rebuilt from full list calls. A
//! failed list leaves the previous snapshot untouched; it is never
//! cleared to empty.

mod agents;

pub use agents::{AgentDirectory, AgentEndpoint, AgentLocator, AgentUpdate, AgentWatch};

use crate::cluster::{ClusterApi, ClusterError};
use crate::models::PodKey;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Namespaces whose workloads are never tracked, scored or remediated
pub const DEFAULT_SYSTEM_NAMESPACES: &[&str] = &[
    "cdi",
    "keti-controller-system",
    "keti-system",
    "kube-flannel",
    "kube-node-lease",
    "kube-public",
    "kube-system",
    "kubevirt",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceFilter {
    system: BTreeSet<String>,
}

impl NamespaceFilter {
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            system: namespaces.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_system(&self, namespace: &str) -> bool {
        self.system.contains(namespace)
    }
}

impl Default for NamespaceFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_NAMESPACES.iter().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tracked {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Tracked {
    fn at(now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedPod {
    pub node_name: Option<String>,
    pub seen: Tracked,
}

pub type NodeMap = BTreeMap<String, Tracked>;
pub type PodMap = BTreeMap<PodKey, TrackedPod>;

/// Membership changes from one refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSummary<K> {
    pub joined: Vec<K>,
    pub departed: Vec<K>,
}

/// Replace `current` with `listed`, carrying `first_seen` over for
/// entries that were already tracked.
fn reconcile<K, V>(
    current: &mut BTreeMap<K, V>,
    mut listed: BTreeMap<K, V>,
    seen: fn(&mut V) -> &mut Tracked,
) -> RefreshSummary<K>
where
    K: Ord + Clone,
{
    let departed = current
        .keys()
        .filter(|key| !listed.contains_key(*key))
        .cloned()
        .collect();

    let mut joined = Vec::new();
    for (key, entry) in listed.iter_mut() {
        match current.get_mut(key) {
            Some(previous) => seen(entry).first_seen = seen(previous).first_seen,
            None => joined.push(key.clone()),
        }
    }

    *current = listed;
    RefreshSummary { joined, departed }
}

pub struct TopologyTracker {
    cluster: Arc<dyn ClusterApi>,
    filter: NamespaceFilter,
    nodes: NodeMap,
    pods: PodMap,
}

impl TopologyTracker {
    pub fn new(cluster: Arc<dyn ClusterApi>, filter: NamespaceFilter) -> Self {
        Self {
            cluster,
            filter,
            nodes: NodeMap::new(),
            pods: PodMap::new(),
        }
    }

    pub fn filter(&self) -> &NamespaceFilter {
        &self.filter
    }

    pub fn nodes(&self) -> &NodeMap {
        &self.nodes
    }

    pub fn pods(&self) -> &PodMap {
        &self.pods
    }

    pub async fn refresh_nodes(&mut self) -> Result<RefreshSummary<String>, ClusterError> {
        let listed = self.cluster.list_nodes().await?;
        let now = Utc::now();

        let listed = listed
            .into_iter()
            .map(|node| (node.name, Tracked::at(now)))
            .collect();

        Ok(reconcile(&mut self.nodes, listed, |tracked| tracked))
    }

    /// Running pods outside the system namespaces
    pub async fn refresh_pods(&mut self) -> Result<RefreshSummary<PodKey>, ClusterError> {
        let listed = self.cluster.list_pods().await?;
        let now = Utc::now();

        let listed = listed
            .into_iter()
            .filter(|pod| pod.is_running() && !self.filter.is_system(&pod.namespace))
            .map(|pod| {
                (
                    pod.key(),
                    TrackedPod {
                        node_name: pod.node_name,
                        seen: Tracked::at(now),
                    },
                )
            })
            .collect();

        Ok(reconcile(&mut self.pods, listed, |pod| &mut pod.seen))
    }

    /// Drop a pod known to be deleted without waiting for the next list
    pub fn forget_pod(&mut self, key: &PodKey) -> bool {
        self.pods.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::{running_pod, MockCluster};
    use crate::models::PodInfo;

    fn tracker(cluster: &Arc<MockCluster>) -> TopologyTracker {
        TopologyTracker::new(cluster.clone(), NamespaceFilter::default())
    }

    #[tokio::test]
    async fn test_refresh_nodes_joined_and_departed() {
        let cluster = Arc::new(MockCluster::new());
        let mut topology = tracker(&cluster);

        cluster.set_nodes(&["n1", "n2"]);
        let summary = topology.refresh_nodes().await.unwrap();
        assert_eq!(summary.joined, vec!["n1".to_string(), "n2".to_string()]);
        assert!(summary.departed.is_empty());

        cluster.set_nodes(&["n2", "n3"]);
        let summary = topology.refresh_nodes().await.unwrap();
        assert_eq!(summary.joined, vec!["n3".to_string()]);
        assert_eq!(summary.departed, vec!["n1".to_string()]);
        assert_eq!(
            topology.nodes().keys().cloned().collect::<Vec<_>>(),
            vec!["n2".to_string(), "n3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_refresh_nodes_is_idempotent() {
        let cluster = Arc::new(MockCluster::new());
        let mut topology = tracker(&cluster);
        cluster.set_nodes(&["n1", "n2"]);

        topology.refresh_nodes().await.unwrap();
        let first = topology.nodes().clone();

        let summary = topology.refresh_nodes().await.unwrap();
        assert!(summary.joined.is_empty());
        assert!(summary.departed.is_empty());

        let second = topology.nodes();
        assert_eq!(first.len(), second.len());
        for (name, tracked) in second {
            assert_eq!(tracked.first_seen, first[name].first_seen);
            assert!(tracked.last_seen >= first[name].last_seen);
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_map() {
        let cluster = Arc::new(MockCluster::new());
        let mut topology = tracker(&cluster);
        cluster.set_nodes(&["n1"]);
        cluster.set_pods(vec![running_pod("shop", "web", "n1")]);
        topology.refresh_nodes().await.unwrap();
        topology.refresh_pods().await.unwrap();

        cluster.fail_lists(true);
        assert!(topology.refresh_nodes().await.is_err());
        assert!(topology.refresh_pods().await.is_err());

        assert_eq!(topology.nodes().len(), 1);
        assert_eq!(topology.pods().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_pods_filters_system_and_pending() {
        let cluster = Arc::new(MockCluster::new());
        let mut topology = tracker(&cluster);

        let pending = PodInfo {
            phase: Some("Pending".to_string()),
            ..running_pod("shop", "queued", "n1")
        };
        cluster.set_pods(vec![
            running_pod("shop", "web", "n1"),
            running_pod("kube-system", "coredns", "n1"),
            running_pod("keti-system", "metric-collector-n1", "n1"),
            pending,
        ]);

        let summary = topology.refresh_pods().await.unwrap();
        assert_eq!(summary.joined, vec![PodKey::new("shop", "web")]);
        assert_eq!(
            topology.pods()[&PodKey::new("shop", "web")].node_name.as_deref(),
            Some("n1")
        );
    }

    #[tokio::test]
    async fn test_forget_pod() {
        let cluster = Arc::new(MockCluster::new());
        let mut topology = tracker(&cluster);
        cluster.set_pods(vec![running_pod("shop", "web", "n1")]);
        topology.refresh_pods().await.unwrap();

        assert!(topology.forget_pod(&PodKey::new("shop", "web")));
        assert!(!topology.forget_pod(&PodKey::new("shop", "web")));
        assert!(topology.pods().is_empty());
    }

    #[test]
    fn test_namespace_filter() {
        let filter = NamespaceFilter::default();
        assert!(filter.is_system("kube-system"));
        assert!(filter.is_system("kubevirt"));
        assert!(!filter.is_system("default"));

        let custom = NamespaceFilter::new(["infra"]);
        assert!(custom.is_system("infra"));
        assert!(!custom.is_system("kube-system"));
    }
}
