//! Score query gRPC service

use crate::engine::ScoreReader;
use crate::health::{components, HealthRegistry};
use crate::proto::{MetricGrpc, MetricGrpcServer, ScoreRequest, ScoreResponse};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info};

/// Answers `GetNodeScore` from the latest published score map. It never
/// waits on a running tick.
pub struct ScoreService {
    scores: ScoreReader,
}

impl ScoreService {
    pub fn new(scores: ScoreReader) -> Self {
        Self { scores }
    }
}

#[tonic::async_trait]
impl MetricGrpc for ScoreService {
    async fn get_node_score(
        &self,
        _request: Request<ScoreRequest>,
    ) -> Result<Response<ScoreResponse>, Status> {
        let snapshot = self.scores.snapshot();
        debug!(nodes = snapshot.len(), "Serving node scores");

        let message = snapshot
            .iter()
            .map(|(node, score)| (node.clone(), score.score as f32))
            .collect();

        Ok(Response::new(ScoreResponse { message }))
    }
}

/// Serve scores on an already bound listener until the server fails.
///
/// Binding happens in the caller so that a port conflict is reported
/// before any background task starts.
pub async fn serve(
    listener: TcpListener,
    scores: ScoreReader,
    health: HealthRegistry,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Starting score server");

    let result = tonic::transport::Server::builder()
        .add_service(MetricGrpcServer::new(ScoreService::new(scores)))
        .serve_with_incoming(TcpListenerStream::new(listener))
        .await;

    if let Err(e) = &result {
        error!(error = %e, "Score server stopped");
        health
            .set_unhealthy(components::SCORE_SERVER, e.to_string())
            .await;
    }

    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{score_board, ScoreMap};
    use crate::models::NodeScore;
    use crate::scoring::Level;

    #[tokio::test]
    async fn test_get_node_score_returns_snapshot() {
        let (board, reader) = score_board();
        let mut scores = ScoreMap::new();
        scores.insert(
            "n1".to_string(),
            NodeScore {
                score: 50.0,
                level: Level::from_score(50.0),
            },
        );
        scores.insert(
            "n2".to_string(),
            NodeScore {
                score: 20.0,
                level: Level::from_score(20.0),
            },
        );
        board.publish(scores);

        let service = ScoreService::new(reader);
        let response = service
            .get_node_score(Request::new(ScoreRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.message.len(), 2);
        assert_eq!(response.message["n1"], 50.0);
        assert_eq!(response.message["n2"], 20.0);
    }

    #[tokio::test]
    async fn test_empty_board_returns_empty_map() {
        let (_board, reader) = score_board();
        let response = ScoreService::new(reader)
            .get_node_score(Request::new(ScoreRequest {}))
            .await
            .unwrap();
        assert!(response.get_ref().message.is_empty());
    }
}
