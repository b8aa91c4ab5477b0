//! Integration tests for the engine's HTTP API and score server

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use engine_lib::{
    api::{create_router, AppState},
    engine::{score_board, ScoreBoard, ScoreMap},
    health::{components, HealthRegistry},
    observability::EngineMetrics,
    proto::{MetricGrpcClient, ScoreRequest},
    server, Level, NodeScore,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>, ScoreBoard) {
    let health = HealthRegistry::new();
    health.register_all(components::ALL).await;

    let (board, scores) = score_board();
    let state = Arc::new(AppState::new(health, scores));
    let router = create_router(state.clone());

    (router, state, board)
}

fn node_score(score: f64) -> NodeScore {
    NodeScore {
        score,
        level: Level::from_score(score),
    }
}

async fn get(app: Router, uri: &str) -> axum::response::Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state, _board) = setup_test_app().await;

    let response = get(app, "/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state, _board) = setup_test_app().await;

    state
        .health
        .set_degraded(components::CONTROL_LOOP, "Topology refresh failed")
        .await;

    // Degraded still returns 200 (operational)
    let response = get(app, "/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _board) = setup_test_app().await;

    state
        .health
        .set_unhealthy(components::SCORE_SERVER, "listener closed")
        .await;

    let response = get(app, "/healthz").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let health = body_json(response).await;
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_healthz_includes_component_details() {
    let (app, _state, _board) = setup_test_app().await;

    let health = body_json(get(app, "/healthz").await).await;

    assert!(health["components"].is_object());
    for name in components::ALL {
        assert!(health["components"][*name].is_object(), "missing {name}");
    }
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state, _board) = setup_test_app().await;

    let response = get(app, "/readyz").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let readiness = body_json(response).await;
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state, _board) = setup_test_app().await;

    state.health.set_ready(true).await;

    let response = get(app, "/readyz").await;
    assert_eq!(response.status(), StatusCode::OK);

    let readiness = body_json(response).await;
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_ready_but_unhealthy() {
    let (app, state, _board) = setup_test_app().await;

    state.health.set_ready(true).await;
    state
        .health
        .set_unhealthy(components::DEPLOYMENT_WATCH, "Failed")
        .await;

    let response = get(app, "/readyz").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state, _board) = setup_test_app().await;

    let metrics = EngineMetrics::new();
    metrics.observe_tick_duration(0.004);
    metrics.inc_watch_reconnects(components::AGENT_WATCH);

    let response = get(app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("analysis_engine_tick_duration_seconds_bucket"));
    assert!(metrics_text.contains("analysis_engine_tick_duration_seconds_count"));
    assert!(metrics_text.contains("analysis_engine_watch_reconnects_total"));
}

#[tokio::test]
async fn test_scores_endpoint_serves_latest_snapshot() {
    let (app, _state, board) = setup_test_app().await;

    let mut scores = ScoreMap::new();
    scores.insert("n1".to_string(), node_score(50.0));
    scores.insert("n2".to_string(), node_score(20.0));
    board.publish(scores);

    let response = get(app, "/v1/scores").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["n1"]["score"], 50.0);
    assert_eq!(body["n1"]["level"], 3);
    assert_eq!(body["n2"]["level"], 1);
}

#[tokio::test]
async fn test_scores_endpoint_empty_before_first_tick() {
    let (app, _state, _board) = setup_test_app().await;

    let body = body_json(get(app, "/v1/scores").await).await;
    assert_eq!(body, serde_json::json!({}));
}

#[tokio::test]
async fn test_score_server_answers_over_grpc() {
    let (board, scores) = score_board();
    let mut map = ScoreMap::new();
    map.insert("worker-1".to_string(), node_score(72.5));
    board.publish(map);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, scores, HealthRegistry::new()));

    let mut client = MetricGrpcClient::connect(format!("http://{addr}"))
        .await
        .unwrap();
    let response = client
        .get_node_score(tonic::Request::new(ScoreRequest {}))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.message.len(), 1);
    assert_eq!(response.message["worker-1"], 72.5);

    // A later publish is visible to the next query.
    board.publish(ScoreMap::new());
    let response = client
        .get_node_score(tonic::Request::new(ScoreRequest {}))
        .await
        .unwrap();
    assert!(response.get_ref().message.is_empty());
}
