//! gRPC client for metric agents

use super::{FetchError, MetricReading, MetricSource, MetricTarget};
use crate::proto::{MetricCollectorClient, MetricRequest};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// Fetches readings over gRPC with a fixed per-request timeout.
///
/// Channels are cached per agent address and dropped after any failure,
/// so a relocated or restarted agent gets a fresh connection on the next
/// tick. There is no retry within a call.
pub struct GrpcMetricSource {
    timeout: Duration,
    channels: DashMap<String, Channel>,
}

impl GrpcMetricSource {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            channels: DashMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn channel(&self, endpoint: &str) -> Result<Channel, FetchError> {
        if let Some(channel) = self.channels.get(endpoint) {
            return Ok(channel.clone());
        }

        let channel = Endpoint::from_shared(format!("http://{}", endpoint))
            .map_err(|e| FetchError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .connect_lazy();

        self.channels.insert(endpoint.to_string(), channel.clone());
        Ok(channel)
    }

    fn request(target: &MetricTarget) -> MetricRequest {
        match target {
            MetricTarget::Node(_) => MetricRequest::default(),
            MetricTarget::Pod(key) => MetricRequest {
                pod_name: key.name.clone(),
                namespace: key.namespace.clone(),
            },
        }
    }
}

#[async_trait]
impl MetricSource for GrpcMetricSource {
    async fn fetch(
        &self,
        endpoint: &str,
        target: &MetricTarget,
    ) -> Result<MetricReading, FetchError> {
        let mut client = MetricCollectorClient::new(self.channel(endpoint)?);
        let call = client.get_multi_metric(Self::request(target));

        let result = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => Err(FetchError::Timeout {
                endpoint: endpoint.to_string(),
                timeout: self.timeout,
            }),
            Ok(Err(status)) if status.code() == tonic::Code::Unavailable => {
                Err(FetchError::Unavailable {
                    endpoint: endpoint.to_string(),
                    message: status.message().to_string(),
                })
            }
            Ok(Err(status)) => Err(FetchError::Status {
                endpoint: endpoint.to_string(),
                status,
            }),
            Ok(Ok(response)) => Ok(MetricReading::from(response.get_ref())),
        };

        if let Err(e) = &result {
            debug!(endpoint = %endpoint, target = %target, error = %e, "Dropping agent channel");
            self.channels.remove(endpoint);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PodKey;
    use crate::proto::metric::metric_collector_server::{
        MetricCollector, MetricCollectorServer,
    };
    use crate::proto::{Metric, MultiMetric};
    use tokio::net::TcpListener;
    use tokio_stream::wrappers::TcpListenerStream;

    struct FakeAgent;

    #[tonic::async_trait]
    impl MetricCollector for FakeAgent {
        async fn get_multi_metric(
            &self,
            request: tonic::Request<MetricRequest>,
        ) -> Result<tonic::Response<MultiMetric>, tonic::Status> {
            let request = request.into_inner();
            let cpu = if request.pod_name.is_empty() { "70" } else { "15" };

            Ok(tonic::Response::new(MultiMetric {
                cpu_percent: Some(Metric {
                    value: cpu.to_string(),
                }),
                memory_percent: Some(Metric {
                    value: "40".to_string(),
                }),
                ..MultiMetric::default()
            }))
        }
    }

    async fn spawn_agent() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(
            tonic::transport::Server::builder()
                .add_service(MetricCollectorServer::new(FakeAgent))
                .serve_with_incoming(TcpListenerStream::new(listener)),
        );

        addr.to_string()
    }

    #[tokio::test]
    async fn test_fetch_node_and_pod_metrics() {
        let endpoint = spawn_agent().await;
        let source = GrpcMetricSource::new(Duration::from_secs(2));

        let node = source
            .fetch(&endpoint, &MetricTarget::Node("n1".to_string()))
            .await
            .unwrap();
        assert_eq!(node.cpu_percent, Some(70.0));
        assert_eq!(node.memory_percent, Some(40.0));
        assert_eq!(node.storage_percent, None);

        let pod = source
            .fetch(&endpoint, &MetricTarget::Pod(PodKey::new("default", "web")))
            .await
            .unwrap();
        assert_eq!(pod.cpu_percent, Some(15.0));
    }

    #[tokio::test]
    async fn test_silent_agent_times_out() {
        // accepts TCP but never speaks HTTP/2
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        let source = GrpcMetricSource::new(Duration::from_millis(200));
        let result = source
            .fetch(&endpoint, &MetricTarget::Node("n1".to_string()))
            .await;

        assert!(result.is_err());
        assert!(source.channels.is_empty());
        drop(listener);
    }

    #[tokio::test]
    async fn test_invalid_endpoint() {
        let source = GrpcMetricSource::new(Duration::from_millis(100));
        let result = source
            .fetch("bad host:::", &MetricTarget::Node("n1".to_string()))
            .await;

        assert!(matches!(result, Err(FetchError::InvalidEndpoint { .. })));
    }
}
