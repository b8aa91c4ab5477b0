//! Metric agent endpoint discovery
//!
//! Agents run as one labelled pod per node. The directory maps a node name
//! to the address of the agent on that node. It is rebuilt by periodic
//! discovery and patched in between by the [`AgentWatch`] task.

use crate::cluster::{ClusterApi, ClusterError, PodEvent, ResourceEvent};
use crate::models::{PodInfo, PodKey};
use crate::watch::WatchSupervisor;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Where to look for metric agent pods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLocator {
    pub namespace: String,
    pub label_selector: String,
    pub port: u16,
}

impl Default for AgentLocator {
    fn default() -> Self {
        Self {
            namespace: "keti-system".to_string(),
            label_selector: "name=metric-collector".to_string(),
            port: 9444,
        }
    }
}

impl AgentLocator {
    /// Node and endpoint of an agent pod, if it is scheduled and has an IP
    fn endpoint(&self, pod: &PodInfo) -> Option<(String, AgentEndpoint)> {
        let node = pod.node_name.clone()?;
        let ip = pod.pod_ip.as_deref().filter(|ip| !ip.is_empty())?;

        Some((
            node,
            AgentEndpoint {
                address: format!("{}:{}", ip, self.port),
                pod: pod.key(),
            },
        ))
    }

    fn endpoints(&self, pods: &[PodInfo]) -> BTreeMap<String, AgentEndpoint> {
        pods.iter().filter_map(|pod| self.endpoint(pod)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEndpoint {
    pub address: String,
    pub pod: PodKey,
}

/// Change to the directory, produced by the agent watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentUpdate {
    Upsert {
        node: String,
        endpoint: AgentEndpoint,
    },
    Remove {
        node: String,
        address: String,
    },
    /// Every agent seen when the watch was (re)opened
    Replace(BTreeMap<String, AgentEndpoint>),
}

impl AgentUpdate {
    pub fn from_event(locator: &AgentLocator, event: &PodEvent) -> Option<Self> {
        match event {
            ResourceEvent::Added(pod) | ResourceEvent::Modified(pod) => {
                let (node, endpoint) = locator.endpoint(pod)?;
                Some(AgentUpdate::Upsert { node, endpoint })
            }
            ResourceEvent::Deleted(pod) => {
                let (node, endpoint) = locator.endpoint(pod)?;
                Some(AgentUpdate::Remove {
                    node,
                    address: endpoint.address,
                })
            }
            ResourceEvent::Restarted(pods) => Some(AgentUpdate::Replace(locator.endpoints(pods))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentDirectory {
    endpoints: BTreeMap<String, AgentEndpoint>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the directory with a fresh listing. On error the last
    /// known endpoints stay in place.
    pub async fn discover(
        &mut self,
        cluster: &dyn ClusterApi,
        locator: &AgentLocator,
    ) -> Result<usize, ClusterError> {
        let pods = cluster
            .list_pods_by_label(&locator.namespace, &locator.label_selector)
            .await?;

        self.endpoints = locator.endpoints(&pods);

        debug!(agents = self.endpoints.len(), "Metric agents discovered");
        Ok(self.endpoints.len())
    }

    pub fn apply(&mut self, update: AgentUpdate) {
        match update {
            AgentUpdate::Upsert { node, endpoint } => {
                self.endpoints.insert(node, endpoint);
            }
            AgentUpdate::Remove { node, address } => {
                // a replacement agent may already have registered
                if self
                    .endpoints
                    .get(&node)
                    .is_some_and(|current| current.address == address)
                {
                    self.endpoints.remove(&node);
                }
            }
            AgentUpdate::Replace(endpoints) => {
                self.endpoints = endpoints;
            }
        }
    }

    pub fn endpoint_for(&self, node: &str) -> Option<&AgentEndpoint> {
        self.endpoints.get(node)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Background task forwarding agent pod changes to the control loop
pub struct AgentWatch {
    cluster: Arc<dyn ClusterApi>,
    locator: AgentLocator,
    supervisor: WatchSupervisor,
    updates: mpsc::UnboundedSender<AgentUpdate>,
}

impl AgentWatch {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        locator: AgentLocator,
        supervisor: WatchSupervisor,
    ) -> (Self, mpsc::UnboundedReceiver<AgentUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                cluster,
                locator,
                supervisor,
                updates,
            },
            rx,
        )
    }

    /// Runs until the control loop drops its receiver
    pub async fn run(self) {
        let Self {
            cluster,
            locator,
            supervisor,
            updates,
        } = self;

        info!(
            namespace = %locator.namespace,
            selector = %locator.label_selector,
            "Starting metric agent watch"
        );

        supervisor
            .run(
                || {
                    let cluster = cluster.clone();
                    let locator = locator.clone();
                    async move {
                        cluster
                            .watch_pods_by_label(&locator.namespace, &locator.label_selector)
                            .await
                    }
                },
                |event| match AgentUpdate::from_event(&locator, &event) {
                    Some(update) => match updates.send(update) {
                        Ok(()) => ControlFlow::Continue(()),
                        // the engine is gone
                        Err(_) => ControlFlow::Break(()),
                    },
                    None => ControlFlow::Continue(()),
                },
            )
            .await;
    }
}
