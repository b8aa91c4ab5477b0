//! Cluster API access
//!
//! The engine talks to the cluster only through [`ClusterApi`]. Watch
//! payloads are decoded once at this boundary into [`ResourceEvent`]s so
//! consumers never inspect raw API objects.

mod kubernetes;
#[cfg(test)]
pub(crate) mod mock;

pub use kubernetes::{parse_quantity, KubeCluster};

use crate::models::{DeploymentInfo, NodeCapacity, NodeInfo, PodInfo};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors from the cluster API collaborator. None of them are fatal to a
/// tick.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster API request failed: {0}")]
    Api(#[from] kube::Error),

    #[error("watch stream reported an error: {0}")]
    Watch(String),

    #[error("cluster API unavailable: {0}")]
    Unavailable(String),
}

/// A change to a watched resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
    /// Full listing taken when the watch was (re)opened. Anything a
    /// consumer knows that is absent here was deleted while disconnected.
    Restarted(Vec<T>),
}

pub type DeploymentEvent = ResourceEvent<DeploymentInfo>;
pub type PodEvent = ResourceEvent<PodInfo>;

/// A live watch. It starts with a [`ResourceEvent::Restarted`] listing and
/// ends when the server closes the connection.
pub type WatchStream<T> = BoxStream<'static, Result<ResourceEvent<T>, ClusterError>>;

/// Operations the engine needs from the cluster API
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError>;

    async fn node_capacity(&self, node_name: &str) -> Result<NodeCapacity, ClusterError>;

    /// Pods in every namespace
    async fn list_pods(&self) -> Result<Vec<PodInfo>, ClusterError>;

    async fn list_pods_by_label(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodInfo>, ClusterError>;

    /// Delete a pod. A pod that is already gone counts as deleted.
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_secs: u32,
    ) -> Result<(), ClusterError>;

    /// Deployments in every namespace
    async fn list_deployments(&self) -> Result<Vec<DeploymentInfo>, ClusterError>;

    async fn watch_deployments(&self) -> Result<WatchStream<DeploymentInfo>, ClusterError>;

    async fn watch_pods_by_label(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<WatchStream<PodInfo>, ClusterError>;
}
