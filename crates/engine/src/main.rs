//! Analysis engine - cluster health control loop
//!
//! Runs as a single Deployment: scores every node from its metric agent,
//! evicts overloaded pods and serves the score map over gRPC.

use engine_lib::{
    api::{self, AppState},
    churn::ChurnWatcher,
    cluster::{ClusterApi, KubeCluster},
    collector::GrpcMetricSource,
    engine::{EngineBuilder, EngineSettings},
    health::{components, HealthRegistry},
    observability::{EngineMetrics, StructuredLogger},
    server,
    topology::AgentWatch,
    watch::WatchSupervisor,
    EngineConfig,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting analysis-engine");

    let config = EngineConfig::load().context("failed to load engine configuration")?;
    info!(
        instance = %config.instance_name,
        tick_interval_secs = config.tick_interval_secs,
        score_port = config.score_port,
        "Engine configured"
    );

    let health = HealthRegistry::new();
    health.register_all(components::ALL).await;

    let metrics = EngineMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);
    let formula = format!("{:?}", config.scoring_formula);
    logger.log_startup(ENGINE_VERSION, &formula);

    // The score port is the one resource the engine cannot run without.
    let score_addr = format!("0.0.0.0:{}", config.score_port);
    let score_listener = TcpListener::bind(&score_addr)
        .await
        .with_context(|| format!("failed to bind score server on {}", score_addr))?;

    let cluster: Arc<dyn ClusterApi> = Arc::new(
        KubeCluster::try_default()
            .await
            .context("failed to create Kubernetes client")?,
    );
    let source = Arc::new(GrpcMetricSource::new(config.fetch_timeout()));

    let (agent_watch, agent_updates) = AgentWatch::new(
        cluster.clone(),
        config.agent_locator(),
        WatchSupervisor::new(
            components::AGENT_WATCH,
            config.watch_backoff(),
            health.clone(),
            metrics.clone(),
        ),
    );
    let (churn_watcher, churn) = ChurnWatcher::new(
        cluster.clone(),
        config.namespace_filter(),
        WatchSupervisor::new(
            components::DEPLOYMENT_WATCH,
            config.watch_backoff(),
            health.clone(),
            metrics.clone(),
        ),
        logger.clone(),
        metrics.clone(),
    );

    let (engine, scores) = EngineBuilder::new()
        .cluster(cluster)
        .metric_source(source)
        .settings(EngineSettings::from(&config))
        .agent_updates(agent_updates)
        .churn(churn)
        .metrics(metrics)
        .logger(logger.clone())
        .health(health.clone())
        .build()?;

    tokio::spawn(agent_watch.run());
    tokio::spawn(churn_watcher.run());
    tokio::spawn(engine.run());

    let score_server = tokio::spawn(server::serve(score_listener, scores.clone(), health.clone()));

    let app_state = Arc::new(AppState::new(health.clone(), scores));
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });

    health.set_ready(true).await;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = score_server => {
            logger.log_shutdown("score server exited");
            result.context("score server task panicked")??;
        }
    }

    info!("Shutting down");
    Ok(())
}
