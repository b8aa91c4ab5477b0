//! [`ClusterApi`] backed by the Kubernetes API server

use super::{ClusterApi, ClusterError, ResourceEvent, WatchStream};
use crate::models::{DeploymentInfo, NodeCapacity, NodeInfo, PodInfo};
use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, ListParams, WatchEvent, WatchParams};
use kube::{Client, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

enum Scale {
    Times(f64),
    Per(f64),
}

/// Quantity suffixes, binary ones first so "Mi" is not read as "M".
const QUANTITY_SUFFIXES: &[(&str, Scale)] = &[
    ("Ki", Scale::Times(1024.0)),
    ("Mi", Scale::Times(1024.0 * 1024.0)),
    ("Gi", Scale::Times(1024.0 * 1024.0 * 1024.0)),
    ("Ti", Scale::Times(1024.0 * 1024.0 * 1024.0 * 1024.0)),
    ("Pi", Scale::Times(1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0)),
    ("Ei", Scale::Times(1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0)),
    ("n", Scale::Per(1e9)),
    ("u", Scale::Per(1e6)),
    ("m", Scale::Per(1e3)),
    ("k", Scale::Times(1e3)),
    ("M", Scale::Times(1e6)),
    ("G", Scale::Times(1e9)),
    ("T", Scale::Times(1e12)),
    ("P", Scale::Times(1e15)),
    ("E", Scale::Times(1e18)),
];

/// Parse a Kubernetes resource quantity ("3800m", "16318644Ki", "2") into
/// base units.
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let (number, scale) = QUANTITY_SUFFIXES
        .iter()
        .find_map(|(suffix, scale)| raw.strip_suffix(suffix).map(|n| (n, Some(scale))))
        .unwrap_or((raw, None));

    let value = number.parse::<f64>().ok().filter(|value| value.is_finite())?;
    Some(match scale {
        Some(Scale::Times(factor)) => value * factor,
        Some(Scale::Per(divisor)) => value / divisor,
        None => value,
    })
}

/// Cluster access through a kube client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster configuration or the local kubeconfig
    pub async fn try_default() -> Result<Self, ClusterError> {
        Ok(Self::new(Client::try_default().await?))
    }
}

fn pod_info(pod: &Pod) -> PodInfo {
    PodInfo {
        name: pod.name_any(),
        namespace: pod.namespace().unwrap_or_default(),
        node_name: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()),
        phase: pod.status.as_ref().and_then(|status| status.phase.clone()),
        pod_ip: pod.status.as_ref().and_then(|status| status.pod_ip.clone()),
    }
}

fn deployment_info(deployment: &Deployment) -> DeploymentInfo {
    DeploymentInfo {
        name: deployment.name_any(),
        namespace: deployment.namespace().unwrap_or_default(),
    }
}

fn node_capacity(node: &Node) -> NodeCapacity {
    let Some(capacity) = node.status.as_ref().and_then(|status| status.capacity.as_ref()) else {
        return NodeCapacity::default();
    };
    let quantity = |key: &str| capacity.get(key).and_then(|q| parse_quantity(&q.0));

    NodeCapacity {
        cpu_cores: quantity("cpu"),
        memory_bytes: quantity("memory").map(|bytes| bytes as u64),
        ephemeral_storage_bytes: quantity("ephemeral-storage").map(|bytes| bytes as u64),
    }
}

fn decode<K, T>(
    event: kube::Result<WatchEvent<K>>,
    convert: fn(&K) -> T,
) -> Option<Result<ResourceEvent<T>, ClusterError>> {
    match event {
        Ok(WatchEvent::Added(object)) => Some(Ok(ResourceEvent::Added(convert(&object)))),
        Ok(WatchEvent::Modified(object)) => Some(Ok(ResourceEvent::Modified(convert(&object)))),
        Ok(WatchEvent::Deleted(object)) => Some(Ok(ResourceEvent::Deleted(convert(&object)))),
        Ok(WatchEvent::Bookmark(_)) => None,
        Ok(WatchEvent::Error(response)) => Some(Err(ClusterError::Watch(format!(
            "{} (code {})",
            response.message, response.code
        )))),
        Err(e) => Some(Err(ClusterError::Api(e))),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;

        Ok(nodes
            .items
            .iter()
            .map(|node| NodeInfo {
                name: node.name_any(),
            })
            .collect())
    }

    async fn node_capacity(&self, node_name: &str) -> Result<NodeCapacity, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let node = api.get(node_name).await?;
        Ok(node_capacity(&node))
    }

    async fn list_pods(&self) -> Result<Vec<PodInfo>, ClusterError> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let pods = api.list(&ListParams::default()).await?;
        Ok(pods.items.iter().map(pod_info).collect())
    }

    async fn list_pods_by_label(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodInfo>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(pods.items.iter().map(pod_info).collect())
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_secs: u32,
    ) -> Result<(), ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            grace_period_seconds: Some(grace_period_secs),
            ..DeleteParams::default()
        };

        match api.delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(namespace = %namespace, pod = %name, "Pod already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_deployments(&self) -> Result<Vec<DeploymentInfo>, ClusterError> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        let deployments = api.list(&ListParams::default()).await?;
        Ok(deployments.items.iter().map(deployment_info).collect())
    }

    async fn watch_deployments(&self) -> Result<WatchStream<DeploymentInfo>, ClusterError> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        list_then_watch(api, None, deployment_info).await
    }

    async fn watch_pods_by_label(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<WatchStream<PodInfo>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        list_then_watch(api, Some(label_selector), pod_info).await
    }
}

/// List, then watch from the list's resourceVersion. Changes made while no
/// watch was open show up in the leading `Restarted` listing, and nothing
/// between the list and the watch is lost.
async fn list_then_watch<K, T>(
    api: Api<K>,
    label_selector: Option<&str>,
    convert: fn(&K) -> T,
) -> Result<WatchStream<T>, ClusterError>
where
    K: Clone + DeserializeOwned + Debug + Send + 'static,
    T: Send + 'static,
{
    let mut list_params = ListParams::default();
    let mut watch_params = WatchParams::default();
    if let Some(selector) = label_selector {
        list_params = list_params.labels(selector);
        watch_params = watch_params.labels(selector);
    }

    let listed = api.list(&list_params).await?;
    let version = listed
        .metadata
        .resource_version
        .clone()
        .unwrap_or_else(|| "0".to_string());
    let restarted = ResourceEvent::Restarted(listed.items.iter().map(convert).collect());
    debug!(resource_version = %version, "Listed, opening watch");

    let events = api.watch(&watch_params, &version).await?;

    Ok(stream::once(future::ready(Ok(restarted)))
        .chain(events.filter_map(move |event| future::ready(decode(event, convert))))
        .boxed())
}
