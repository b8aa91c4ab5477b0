//! Deployment churn tracking
//!
//! A deployment is flagged as recently restarted when an add event is seen
//! for it outside the system namespaces, and unflagged when it is deleted.
//! There is no expiry. Flags are held per namespace and name; the published
//! set carries names only.

use crate::cluster::{ClusterApi, DeploymentEvent, ResourceEvent};
use crate::models::DeploymentInfo;
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::topology::NamespaceFilter;
use crate::watch::WatchSupervisor;
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::watch;

/// Names of currently flagged deployments
pub type FlaggedDeployments = Arc<BTreeSet<String>>;

/// Flags set and cleared by one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChurnChange {
    pub flagged: Vec<DeploymentInfo>,
    pub cleared: Vec<DeploymentInfo>,
}

impl ChurnChange {
    pub fn is_empty(&self) -> bool {
        self.flagged.is_empty() && self.cleared.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentChurn {
    flags: BTreeSet<DeploymentInfo>,
    filter: NamespaceFilter,
}

impl DeploymentChurn {
    pub fn new(filter: NamespaceFilter) -> Self {
        Self {
            flags: BTreeSet::new(),
            filter,
        }
    }

    /// Events for system namespaces never change state, deletes included.
    ///
    /// A `Restarted` listing replaces the flag set, so a delete missed
    /// while the watch was down still clears its flag.
    pub fn apply(&mut self, event: &DeploymentEvent) -> ChurnChange {
        let mut change = ChurnChange::default();

        match event {
            ResourceEvent::Added(deployment) if !self.filter.is_system(&deployment.namespace) => {
                if self.flags.insert(deployment.clone()) {
                    change.flagged.push(deployment.clone());
                }
            }
            ResourceEvent::Deleted(deployment) if !self.filter.is_system(&deployment.namespace) => {
                if self.flags.remove(deployment) {
                    change.cleared.push(deployment.clone());
                }
            }
            ResourceEvent::Restarted(listed) => {
                let current: BTreeSet<DeploymentInfo> = listed
                    .iter()
                    .filter(|deployment| !self.filter.is_system(&deployment.namespace))
                    .cloned()
                    .collect();

                change.cleared = self.flags.difference(&current).cloned().collect();
                change.flagged = current.difference(&self.flags).cloned().collect();
                self.flags = current;
            }
            _ => {}
        }

        change
    }

    pub fn is_flagged(&self, namespace: &str, name: &str) -> bool {
        self.flags
            .iter()
            .any(|deployment| deployment.namespace == namespace && deployment.name == name)
    }

    pub fn flagged(&self) -> BTreeSet<String> {
        self.flags
            .iter()
            .map(|deployment| deployment.name.clone())
            .collect()
    }
}

/// Background task consuming the deployment watch
pub struct ChurnWatcher {
    cluster: Arc<dyn ClusterApi>,
    churn: DeploymentChurn,
    supervisor: WatchSupervisor,
    logger: StructuredLogger,
    metrics: EngineMetrics,
    published: watch::Sender<FlaggedDeployments>,
}

impl ChurnWatcher {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        filter: NamespaceFilter,
        supervisor: WatchSupervisor,
        logger: StructuredLogger,
        metrics: EngineMetrics,
    ) -> (Self, watch::Receiver<FlaggedDeployments>) {
        let (published, rx) = watch::channel(FlaggedDeployments::default());
        (
            Self {
                cluster,
                churn: DeploymentChurn::new(filter),
                supervisor,
                logger,
                metrics,
                published,
            },
            rx,
        )
    }

    /// Runs for the life of the process
    pub async fn run(self) {
        let Self {
            cluster,
            mut churn,
            supervisor,
            logger,
            metrics,
            published,
        } = self;

        supervisor
            .run(
                || {
                    let cluster = cluster.clone();
                    async move { cluster.watch_deployments().await }
                },
                |event| {
                    let change = churn.apply(&event);
                    if change.is_empty() {
                        return ControlFlow::Continue(());
                    }

                    for deployment in &change.flagged {
                        logger.log_deployment_restart(deployment);
                    }
                    for deployment in &change.cleared {
                        logger.log_deployment_removed(deployment);
                    }

                    let flagged = churn.flagged();
                    metrics.set_deployments_flagged(flagged.len());
                    published.send_replace(Arc::new(flagged));
                    ControlFlow::Continue(())
                },
            )
            .await;
    }
}
