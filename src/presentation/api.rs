// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! REST facade.
//!
//! Thin handlers over the registry, event store, dispatcher and cluster
//! repository. Failures surface as `{"error": "<message>"}` with 400 for
//! caller faults, 404/503 for missing or offline resources and 500 for
//! store failures.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::application::dispatcher::{CommandDispatcher, DispatchError};
use crate::application::event_pipeline::EventPipeline;
use crate::application::registry::{AgentRegistry, RegistryError};
use crate::application::workflow_engine::WorkflowEngine;
use crate::domain::agent::AgentStatus;
use crate::domain::cluster::Cluster;
use crate::domain::command::Command;
use crate::domain::repository::{CacheStore, ClusterRepository, EventQuery, EventRepository};
use crate::infrastructure::bus::router::BusRouter;
use crate::infrastructure::db::Database;

pub struct AppState {
    pub registry: Arc<AgentRegistry>,
    pub pipeline: Arc<EventPipeline>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub engine: Arc<WorkflowEngine>,
    pub bus_router: Arc<BusRouter>,
    pub clusters: Arc<dyn ClusterRepository>,
    pub events: Arc<dyn EventRepository>,
    pub cache: Arc<dyn CacheStore>,
    pub db: Option<Database>,
    pub started_at: DateTime<Utc>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health/live", get(handle_liveness))
        .route("/health/ready", get(handle_readiness))
        .route("/health/status", get(handle_status))
        .route("/metrics", get(handle_metrics))
        .route("/api/v1/agents", get(handle_list_agents))
        .route("/api/v1/agents/:id", get(handle_get_agent))
        .route("/api/v1/agents/:id", delete(handle_delete_agent))
        .route("/api/v1/clusters", get(handle_list_clusters))
        .route("/api/v1/clusters", post(handle_create_cluster))
        .route("/api/v1/clusters/:id", get(handle_get_cluster))
        .route("/api/v1/clusters/:id", put(handle_update_cluster))
        .route("/api/v1/clusters/:id", delete(handle_delete_cluster))
        .route("/api/v1/clusters/:id/health", get(handle_cluster_health))
        .route("/api/v1/events", get(handle_list_events))
        .route("/api/v1/events/:id", get(handle_get_event))
        .route("/api/v1/events/search", post(handle_search_events))
        .route("/api/v1/commands", post(handle_send_command))
        .route("/api/v1/commands", get(handle_list_pending_commands))
        .route("/api/v1/commands/:id", get(handle_get_command))
        .route("/api/v1/commands/:id/result", get(handle_get_command_result))
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

fn registry_error(err: RegistryError) -> Response {
    match err {
        RegistryError::Validation(_) => error_response(StatusCode::BAD_REQUEST, err),
        RegistryError::NotFound(_) => error_response(StatusCode::NOT_FOUND, err),
        RegistryError::Store(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}

fn dispatch_error(err: DispatchError) -> Response {
    match err {
        DispatchError::Validation(_) => error_response(StatusCode::BAD_REQUEST, err),
        DispatchError::ClusterNotFound(_) => error_response(StatusCode::NOT_FOUND, err),
        DispatchError::AgentUnavailable(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, err),
        DispatchError::Bus(_) | DispatchError::Store(_) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err)
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn handle_liveness() -> Response {
    (StatusCode::OK, Json(json!({ "status": "alive" }))).into_response()
}

async fn handle_readiness(State(state): State<Arc<AppState>>) -> Response {
    if let Some(db) = &state.db {
        if db.health().await.is_err() {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "not ready", "reason": "database unavailable" })),
            )
                .into_response();
        }
    }
    if state.cache.health().await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready", "reason": "cache unavailable" })),
        )
            .into_response();
    }
    (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response()
}

async fn handle_status(State(state): State<Arc<AppState>>) -> Response {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "uptime_seconds": uptime,
            "components": {
                "registry": state.registry.statistics().await,
                "event_pipeline": state.pipeline.statistics(),
                "dispatcher": state.dispatcher.statistics(),
                "workflow_engine": state.engine.statistics(),
                "bus": state.bus_router.statistics(),
            },
            "timestamp": Utc::now(),
        })),
    )
        .into_response()
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "registry": state.registry.statistics().await,
            "event_pipeline": state.pipeline.statistics(),
            "dispatcher": state.dispatcher.statistics(),
            "workflow_engine": state.engine.statistics(),
            "bus": state.bus_router.statistics(),
        })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ListAgentsParams {
    status: Option<String>,
}

async fn handle_list_agents(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListAgentsParams>,
) -> Response {
    let status = match params.status.as_deref() {
        Some(raw) => match AgentStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("invalid status '{raw}'"),
                )
            }
        },
        None => None,
    };

    match state.registry.list(status).await {
        Ok(agents) => {
            let count = agents.len();
            (
                StatusCode::OK,
                Json(json!({ "agents": agents, "count": count })),
            )
                .into_response()
        }
        Err(e) => registry_error(e),
    }
}

async fn handle_get_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.registry.get(&id).await {
        Ok(Some(agent)) => (StatusCode::OK, Json(json!(agent))).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "agent not found"),
        Err(e) => registry_error(e),
    }
}

async fn handle_delete_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.registry.unregister(&id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "unregistered" }))).into_response(),
        Err(e) => registry_error(e),
    }
}

// ---------------------------------------------------------------------------
// Clusters
// ---------------------------------------------------------------------------

async fn handle_list_clusters(State(state): State<Arc<AppState>>) -> Response {
    match state.clusters.list().await {
        Ok(clusters) => {
            let count = clusters.len();
            (
                StatusCode::OK,
                Json(json!({ "clusters": clusters, "count": count })),
            )
                .into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn handle_create_cluster(
    State(state): State<Arc<AppState>>,
    Json(cluster): Json<Cluster>,
) -> Response {
    if cluster.id.is_empty() || cluster.name.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "cluster id and name are required");
    }
    match state.clusters.save(&cluster).await {
        Ok(()) => (StatusCode::CREATED, Json(json!(cluster))).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn handle_get_cluster(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.clusters.find_by_id(&id).await {
        Ok(Some(cluster)) => (StatusCode::OK, Json(json!(cluster))).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "cluster not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn handle_update_cluster(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut cluster): Json<Cluster>,
) -> Response {
    cluster.id = id;
    cluster.updated_at = Utc::now();
    match state.clusters.save(&cluster).await {
        Ok(()) => (StatusCode::OK, Json(json!(cluster))).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn handle_delete_cluster(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.clusters.delete(&id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "deleted" }))).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn handle_cluster_health(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.clusters.find_by_id(&id).await {
        Ok(Some(cluster)) => (
            StatusCode::OK,
            Json(json!({
                "cluster_id": cluster.id,
                "health": cluster.health,
                "status": cluster.status,
            })),
        )
            .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "cluster not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
struct EventSearchParams {
    cluster_id: Option<String>,
    severity: Option<String>,
    namespace: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

impl From<EventSearchParams> for EventQuery {
    fn from(params: EventSearchParams) -> Self {
        EventQuery {
            cluster_id: params.cluster_id,
            severity: params.severity,
            namespace: params.namespace,
            start_time: params.start_time,
            end_time: params.end_time,
            limit: params.limit.unwrap_or(100),
        }
    }
}

async fn handle_list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventSearchParams>,
) -> Response {
    match state.events.search(&params.into()).await {
        Ok(events) => {
            let count = events.len();
            (
                StatusCode::OK,
                Json(json!({ "events": events, "count": count })),
            )
                .into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn handle_get_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.events.find_by_id(&id).await {
        Ok(Some(event)) => (StatusCode::OK, Json(json!(event))).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "event not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn handle_search_events(
    State(state): State<Arc<AppState>>,
    Json(params): Json<EventSearchParams>,
) -> Response {
    match state.events.search(&params.into()).await {
        Ok(events) => {
            let count = events.len();
            (
                StatusCode::OK,
                Json(json!({ "events": events, "count": count })),
            )
                .into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn handle_send_command(
    State(state): State<Arc<AppState>>,
    Json(command): Json<Command>,
) -> Response {
    match state.dispatcher.dispatch(command).await {
        Ok(command) => (StatusCode::ACCEPTED, Json(json!(command))).into_response(),
        Err(e) => dispatch_error(e),
    }
}

async fn handle_list_pending_commands(State(state): State<Arc<AppState>>) -> Response {
    let pending = state.dispatcher.pending_commands();
    let count = pending.len();
    (
        StatusCode::OK,
        Json(json!({ "commands": pending, "count": count })),
    )
        .into_response()
}

async fn handle_get_command(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.dispatcher.get_command(&id).await {
        Ok(Some(command)) => (StatusCode::OK, Json(json!(command))).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "command not found"),
        Err(e) => dispatch_error(e),
    }
}

async fn handle_get_command_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.dispatcher.get_result(&id).await {
        Ok(Some(result)) => (StatusCode::OK, Json(json!(result))).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "result not available"),
        Err(e) => dispatch_error(e),
    }
}
