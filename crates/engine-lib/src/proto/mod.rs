//! Wire types for the metric agent and score query services
//!
//! The types mirror `proto/metric/v1/metric.proto` and
//! `proto/score/v1/score.proto`. They are maintained by hand so the crate
//! builds without `protoc`; enable the `proto-gen` feature to generate
//! them with tonic-build instead.

#[cfg(feature = "proto-gen")]
pub mod metric {
    tonic::include_proto!("metric");
}

#[cfg(feature = "proto-gen")]
pub mod score {
    tonic::include_proto!("score");
}

#[cfg(not(feature = "proto-gen"))]
pub mod metric {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct MetricRequest {
        #[prost(string, tag = "1")]
        pub pod_name: String,
        #[prost(string, tag = "2")]
        pub namespace: String,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Metric {
        #[prost(string, tag = "1")]
        pub value: String,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct MultiMetric {
        #[prost(message, optional, tag = "1")]
        pub cpu_percent: Option<Metric>,
        #[prost(message, optional, tag = "2")]
        pub memory_percent: Option<Metric>,
        #[prost(message, optional, tag = "3")]
        pub storage_percent: Option<Metric>,
        #[prost(message, optional, tag = "4")]
        pub network_percent: Option<Metric>,
        #[prost(message, optional, tag = "5")]
        pub network_tx_bytes: Option<Metric>,
        #[prost(message, optional, tag = "6")]
        pub network_rx_bytes: Option<Metric>,
    }

    pub mod metric_collector_client {
        use tonic::codegen::*;

        #[derive(Debug, Clone)]
        pub struct MetricCollectorClient<T> {
            inner: tonic::client::Grpc<T>,
        }

        impl MetricCollectorClient<tonic::transport::Channel> {
            pub fn new(channel: tonic::transport::Channel) -> Self {
                let inner = tonic::client::Grpc::new(channel);
                Self { inner }
            }
        }

        impl<T> MetricCollectorClient<T>
        where
            T: tonic::client::GrpcService<tonic::body::BoxBody>,
            T::Error: Into<StdError>,
            T::ResponseBody: Body<Data = Bytes> + Send + 'static,
            <T::ResponseBody as Body>::Error: Into<StdError> + Send,
        {
            pub async fn get_multi_metric(
                &mut self,
                request: impl tonic::IntoRequest<super::MetricRequest>,
            ) -> Result<tonic::Response<super::MultiMetric>, tonic::Status> {
                self.inner.ready().await.map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
                let codec = tonic::codec::ProstCodec::default();
                let path =
                    http::uri::PathAndQuery::from_static("/metric.MetricCollector/GetMultiMetric");
                self.inner.unary(request.into_request(), path, codec).await
            }
        }
    }

    /// Server side of the agent protocol. The engine never serves it; it
    /// exists so tests can stand up an in-process agent.
    pub mod metric_collector_server {
        use tonic::codegen::*;

        #[async_trait]
        pub trait MetricCollector: Send + Sync + 'static {
            async fn get_multi_metric(
                &self,
                request: tonic::Request<super::MetricRequest>,
            ) -> Result<tonic::Response<super::MultiMetric>, tonic::Status>;
        }

        pub struct MetricCollectorServer<T: MetricCollector> {
            inner: Arc<T>,
        }

        impl<T: MetricCollector> MetricCollectorServer<T> {
            pub fn new(inner: T) -> Self {
                Self::from_arc(Arc::new(inner))
            }

            pub fn from_arc(inner: Arc<T>) -> Self {
                Self { inner }
            }
        }

        impl<T, B> Service<http::Request<B>> for MetricCollectorServer<T>
        where
            T: MetricCollector,
            B: Body + Send + 'static,
            B::Error: Into<StdError> + Send + 'static,
        {
            type Response = http::Response<tonic::body::BoxBody>;
            type Error = std::convert::Infallible;
            type Future = BoxFuture<Self::Response, Self::Error>;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, req: http::Request<B>) -> Self::Future {
                match req.uri().path() {
                    "/metric.MetricCollector/GetMultiMetric" => {
                        struct GetMultiMetricSvc<T: MetricCollector>(Arc<T>);

                        impl<T: MetricCollector> tonic::server::UnaryService<super::MetricRequest>
                            for GetMultiMetricSvc<T>
                        {
                            type Response = super::MultiMetric;
                            type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

                            fn call(
                                &mut self,
                                request: tonic::Request<super::MetricRequest>,
                            ) -> Self::Future {
                                let inner = Arc::clone(&self.0);
                                Box::pin(async move { inner.get_multi_metric(request).await })
                            }
                        }

                        let inner = Arc::clone(&self.inner);
                        Box::pin(async move {
                            let codec = tonic::codec::ProstCodec::default();
                            let mut grpc = tonic::server::Grpc::new(codec);
                            Ok(grpc.unary(GetMultiMetricSvc(inner), req).await)
                        })
                    }
                    _ => Box::pin(async move { Ok(super::super::unimplemented_response()) }),
                }
            }
        }

        impl<T: MetricCollector> Clone for MetricCollectorServer<T> {
            fn clone(&self) -> Self {
                Self {
                    inner: Arc::clone(&self.inner),
                }
            }
        }

        impl<T: MetricCollector> tonic::server::NamedService for MetricCollectorServer<T> {
            const NAME: &'static str = "metric.MetricCollector";
        }
    }
}

#[cfg(not(feature = "proto-gen"))]
pub mod score {
    use prost::Message;
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, Message)]
    pub struct ScoreRequest {}

    #[derive(Clone, PartialEq, Message)]
    pub struct ScoreResponse {
        #[prost(map = "string, float", tag = "1")]
        pub message: HashMap<String, f32>,
    }

    pub mod metric_grpc_client {
        use tonic::codegen::*;

        #[derive(Debug, Clone)]
        pub struct MetricGrpcClient<T> {
            inner: tonic::client::Grpc<T>,
        }

        impl MetricGrpcClient<tonic::transport::Channel> {
            pub fn new(channel: tonic::transport::Channel) -> Self {
                let inner = tonic::client::Grpc::new(channel);
                Self { inner }
            }

            pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
            where
                D: TryInto<tonic::transport::Endpoint>,
                D::Error: Into<StdError>,
            {
                let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
                Ok(Self::new(conn))
            }
        }

        impl<T> MetricGrpcClient<T>
        where
            T: tonic::client::GrpcService<tonic::body::BoxBody>,
            T::Error: Into<StdError>,
            T::ResponseBody: Body<Data = Bytes> + Send + 'static,
            <T::ResponseBody as Body>::Error: Into<StdError> + Send,
        {
            pub async fn get_node_score(
                &mut self,
                request: impl tonic::IntoRequest<super::ScoreRequest>,
            ) -> Result<tonic::Response<super::ScoreResponse>, tonic::Status> {
                self.inner.ready().await.map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
                let codec = tonic::codec::ProstCodec::default();
                let path = http::uri::PathAndQuery::from_static("/score.MetricGRPC/GetNodeScore");
                self.inner.unary(request.into_request(), path, codec).await
            }
        }
    }

    pub mod metric_grpc_server {
        use tonic::codegen::*;

        #[async_trait]
        pub trait MetricGrpc: Send + Sync + 'static {
            async fn get_node_score(
                &self,
                request: tonic::Request<super::ScoreRequest>,
            ) -> Result<tonic::Response<super::ScoreResponse>, tonic::Status>;
        }

        pub struct MetricGrpcServer<T: MetricGrpc> {
            inner: Arc<T>,
        }

        impl<T: MetricGrpc> MetricGrpcServer<T> {
            pub fn new(inner: T) -> Self {
                Self::from_arc(Arc::new(inner))
            }

            pub fn from_arc(inner: Arc<T>) -> Self {
                Self { inner }
            }
        }

        impl<T, B> Service<http::Request<B>> for MetricGrpcServer<T>
        where
            T: MetricGrpc,
            B: Body + Send + 'static,
            B::Error: Into<StdError> + Send + 'static,
        {
            type Response = http::Response<tonic::body::BoxBody>;
            type Error = std::convert::Infallible;
            type Future = BoxFuture<Self::Response, Self::Error>;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, req: http::Request<B>) -> Self::Future {
                match req.uri().path() {
                    "/score.MetricGRPC/GetNodeScore" => {
                        struct GetNodeScoreSvc<T: MetricGrpc>(Arc<T>);

                        impl<T: MetricGrpc> tonic::server::UnaryService<super::ScoreRequest>
                            for GetNodeScoreSvc<T>
                        {
                            type Response = super::ScoreResponse;
                            type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

                            fn call(
                                &mut self,
                                request: tonic::Request<super::ScoreRequest>,
                            ) -> Self::Future {
                                let inner = Arc::clone(&self.0);
                                Box::pin(async move { inner.get_node_score(request).await })
                            }
                        }

                        let inner = Arc::clone(&self.inner);
                        Box::pin(async move {
                            let codec = tonic::codec::ProstCodec::default();
                            let mut grpc = tonic::server::Grpc::new(codec);
                            Ok(grpc.unary(GetNodeScoreSvc(inner), req).await)
                        })
                    }
                    _ => Box::pin(async move { Ok(super::super::unimplemented_response()) }),
                }
            }
        }

        impl<T: MetricGrpc> Clone for MetricGrpcServer<T> {
            fn clone(&self) -> Self {
                Self {
                    inner: Arc::clone(&self.inner),
                }
            }
        }

        impl<T: MetricGrpc> tonic::server::NamedService for MetricGrpcServer<T> {
            const NAME: &'static str = "score.MetricGRPC";
        }
    }
}

/// grpc-status 12 (UNIMPLEMENTED) for paths no method is registered on.
#[cfg(not(feature = "proto-gen"))]
fn unimplemented_response() -> tonic::codegen::http::Response<tonic::body::BoxBody> {
    use tonic::codegen::http::{header, HeaderValue, Response};

    let mut response = Response::new(tonic::codegen::empty_body());
    let headers = response.headers_mut();
    headers.insert("grpc-status", HeaderValue::from_static("12"));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/grpc"),
    );
    response
}

pub use metric::metric_collector_client::MetricCollectorClient;
pub use metric::{Metric, MetricRequest, MultiMetric};
pub use score::metric_grpc_client::MetricGrpcClient;
pub use score::metric_grpc_server::{MetricGrpc, MetricGrpcServer};
pub use score::{ScoreRequest, ScoreResponse};
