//! Clients for the engine's score server and HTTP API

use anyhow::{Context, Result};
use engine_lib::proto::{MetricGrpcClient, ScoreRequest};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the engine API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// GET a JSON document. Non-success responses whose body still parses
    /// (e.g. a 503 from `/healthz`) are returned as data.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;

        match serde_json::from_str(&body) {
            Ok(value) => Ok(value),
            Err(_) if !status.is_success() => anyhow::bail!("API error ({}): {}", status, body),
            Err(e) => Err(e).context("Failed to parse response"),
        }
    }
}

/// gRPC client for `GetNodeScore`
pub struct ScoreClient {
    inner: MetricGrpcClient<Channel>,
}

impl ScoreClient {
    pub async fn connect(address: &str) -> Result<Self> {
        let address = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        let channel = Endpoint::from_shared(address.clone())
            .with_context(|| format!("Invalid engine address: {}", address))?
            .timeout(REQUEST_TIMEOUT)
            .connect()
            .await
            .with_context(|| format!("Failed to connect to {}", address))?;

        Ok(Self {
            inner: MetricGrpcClient::new(channel),
        })
    }

    pub async fn node_scores(&mut self) -> Result<BTreeMap<String, f64>> {
        let response = self
            .inner
            .get_node_score(ScoreRequest {})
            .await
            .context("GetNodeScore failed")?;

        Ok(response
            .into_inner()
            .message
            .into_iter()
            .map(|(node, score)| (node, f64::from(score)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_lib::HealthResponse;

    #[tokio::test]
    async fn test_get_parses_success_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/healthz")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":"healthy","components":{"control_loop":{"status":"healthy","last_check_timestamp":1}}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let health: HealthResponse = client.get("healthz").await.unwrap();

        mock.assert_async().await;
        assert_eq!(health.components.len(), 1);
        assert!(health.status.is_operational());
    }

    #[tokio::test]
    async fn test_get_returns_unhealthy_body_on_503() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_body(
                r#"{"status":"unhealthy","components":{"score_server":{"status":"unhealthy","message":"closed","last_check_timestamp":1}}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let health: HealthResponse = client.get("healthz").await.unwrap();

        assert!(!health.status.is_operational());
        assert_eq!(
            health.components["score_server"].message.as_deref(),
            Some("closed")
        );
    }

    #[tokio::test]
    async fn test_get_reports_error_status_with_plain_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.get::<HealthResponse>("healthz").await.unwrap_err();

        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_invalid_api_url() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
