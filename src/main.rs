// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Aetherius control-plane server.
//!
//! Wires the durable store, cache and bus adapters into the registry, event
//! pipeline, dispatcher, workflow engine and strategy matcher, then serves
//! the REST facade until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use aetherius_control_plane::application::dispatcher::CommandDispatcher;
use aetherius_control_plane::application::event_pipeline::EventPipeline;
use aetherius_control_plane::application::registry::{AgentRegistry, RegistryConfig};
use aetherius_control_plane::application::step_executor::StepExecutor;
use aetherius_control_plane::application::strategy_matcher::StrategyMatcher;
use aetherius_control_plane::application::workflow_engine::WorkflowEngine;
use aetherius_control_plane::domain::event::EventSeverity;
use aetherius_control_plane::domain::repository::{
    AgentRepository, CacheStore, ClusterRepository, CommandRepository, EventRepository,
    ExecutionRepository, StrategyRepository, WorkflowRepository,
};
use aetherius_control_plane::infrastructure::bus::nats::NatsBus;
use aetherius_control_plane::infrastructure::bus::router::BusRouter;
use aetherius_control_plane::infrastructure::bus::subscriber::InternalEventSubscriber;
use aetherius_control_plane::infrastructure::bus::MessageBus;
use aetherius_control_plane::infrastructure::clients::{HttpCommandApi, ReasoningClient};
use aetherius_control_plane::infrastructure::config::Config;
use aetherius_control_plane::infrastructure::db::Database;
use aetherius_control_plane::infrastructure::redis_cache::RedisCache;
use aetherius_control_plane::infrastructure::repositories::{
    PostgresAgentRepository, PostgresClusterRepository, PostgresCommandRepository,
    PostgresEventRepository, PostgresExecutionRepository, PostgresStrategyRepository,
    PostgresWorkflowRepository,
};
use aetherius_control_plane::presentation::api::{app, AppState};

/// Aetherius control plane.
#[derive(Parser)]
#[command(name = "aetherius-control-plane")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "AETHERIUS_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    init_tracing(&config);
    info!(config = %cli.config.display(), "starting aetherius control plane");

    // Adapters, leaves first.
    let db = Database::connect(&config.database)
        .await
        .context("failed to connect to postgres")?;
    let cache: Arc<dyn CacheStore> = Arc::new(
        RedisCache::connect(&config.redis)
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to redis: {e}"))?,
    );
    let bus: Arc<dyn MessageBus> = Arc::new(
        NatsBus::connect(&config.nats)
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to NATS: {e}"))?,
    );

    let agents: Arc<dyn AgentRepository> =
        Arc::new(PostgresAgentRepository::new(db.pool().clone()));
    let clusters: Arc<dyn ClusterRepository> =
        Arc::new(PostgresClusterRepository::new(db.pool().clone()));
    let events: Arc<dyn EventRepository> =
        Arc::new(PostgresEventRepository::new(db.pool().clone()));
    let commands: Arc<dyn CommandRepository> =
        Arc::new(PostgresCommandRepository::new(db.pool().clone()));
    let workflows: Arc<dyn WorkflowRepository> =
        Arc::new(PostgresWorkflowRepository::new(db.pool().clone()));
    let executions: Arc<dyn ExecutionRepository> =
        Arc::new(PostgresExecutionRepository::new(db.pool().clone()));
    let strategies: Arc<dyn StrategyRepository> =
        Arc::new(PostgresStrategyRepository::new(db.pool().clone()));

    // Core components.
    let registry = Arc::new(AgentRegistry::new(
        Arc::clone(&agents),
        Arc::clone(&cache),
        RegistryConfig::default(),
    ));
    let pipeline = Arc::new(EventPipeline::new(
        Arc::clone(&events),
        Arc::clone(&cache),
        Arc::clone(&clusters),
        Arc::clone(&bus),
        EventSeverity::Medium,
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(
        Arc::clone(&commands),
        Arc::clone(&registry),
        Arc::clone(&bus),
    ));

    let listen_addr = format!("{}:{}", config.server.host, config.server.port);
    let self_url = format!("http://127.0.0.1:{}", config.server.port);
    let executor = Arc::new(StepExecutor::new(
        Arc::new(HttpCommandApi::new(self_url)),
        Arc::new(ReasoningClient::new(
            config.ai.reasoning_service_url.clone(),
            config.ai.timeout,
        )),
    ));
    let engine = Arc::new(WorkflowEngine::new(
        Arc::clone(&workflows),
        Arc::clone(&executions),
        executor,
    ));
    let matcher = Arc::new(StrategyMatcher::new(
        Arc::clone(&strategies),
        Arc::clone(&engine),
    ));

    let bus_router = Arc::new(BusRouter::new(
        Arc::clone(&bus),
        Arc::clone(&registry),
        Arc::clone(&pipeline),
        Arc::clone(&dispatcher),
    ));
    let subscriber = Arc::new(InternalEventSubscriber::new(
        Arc::clone(&bus),
        Arc::clone(&matcher),
    ));

    registry
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start registry: {e}"))?;
    bus_router
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start bus router: {e}"))?;
    subscriber
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start internal subscriber: {e}"))?;

    // REST facade.
    let state = Arc::new(AppState {
        registry: Arc::clone(&registry),
        pipeline: Arc::clone(&pipeline),
        dispatcher: Arc::clone(&dispatcher),
        engine: Arc::clone(&engine),
        bus_router: Arc::clone(&bus_router),
        clusters,
        events,
        cache,
        db: Some(db.clone()),
        started_at: Utc::now(),
    });

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!(addr = %listen_addr, "api server listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("api server failed")?;

    // Reverse-order teardown with the configured grace period.
    info!(
        grace_secs = config.server.graceful_stop.as_secs(),
        "shutting down"
    );
    subscriber.stop();
    bus_router.stop();
    engine.stop();
    dispatcher.stop();
    registry.stop();
    tokio::time::sleep(config.server.graceful_stop.min(std::time::Duration::from_secs(1))).await;
    db.close().await;

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install SIGINT handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
