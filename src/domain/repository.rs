// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository & Cache Ports
//!
//! One repository trait per aggregate root. The durable store is the source
//! of truth on restart; the cache tier is advisory (errors fail open).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::agent::{Agent, AgentStatus};
use crate::domain::cluster::Cluster;
use crate::domain::command::{Command, CommandResult, CommandStatus};
use crate::domain::event::Event;
use crate::domain::strategy::Strategy;
use crate::domain::workflow::{Workflow, WorkflowExecution};

/// Repository errors.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Save agent (create or update by id).
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Agent>, RepositoryError>;

    async fn find_by_cluster_id(&self, cluster_id: &str) -> Result<Option<Agent>, RepositoryError>;

    async fn list(&self, status: Option<AgentStatus>) -> Result<Vec<Agent>, RepositoryError>;

    async fn update_status(&self, id: &str, status: AgentStatus) -> Result<(), RepositoryError>;

    async fn update_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<(), RepositoryError>;

    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ClusterRepository: Send + Sync {
    async fn save(&self, cluster: &Cluster) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Cluster>, RepositoryError>;

    async fn list(&self) -> Result<Vec<Cluster>, RepositoryError>;

    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
}

/// Query filter for event listings. Zero values mean "no constraint".
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub cluster_id: Option<String>,
    pub severity: Option<String>,
    pub namespace: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: i64,
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Insert an event. Events are immutable after persistence.
    async fn insert(&self, event: &Event) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Event>, RepositoryError>;

    async fn search(&self, query: &EventQuery) -> Result<Vec<Event>, RepositoryError>;
}

#[async_trait]
pub trait CommandRepository: Send + Sync {
    async fn insert(&self, command: &Command) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Command>, RepositoryError>;

    async fn update_status(&self, id: &str, status: CommandStatus) -> Result<(), RepositoryError>;

    async fn insert_result(&self, result: &CommandResult) -> Result<(), RepositoryError>;

    async fn find_result(&self, command_id: &str)
        -> Result<Option<CommandResult>, RepositoryError>;
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Workflow>, RepositoryError>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Save execution state (create or update). Called on every transition
    /// and after each step.
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<WorkflowExecution>, RepositoryError>;
}

#[async_trait]
pub trait StrategyRepository: Send + Sync {
    async fn save(&self, strategy: &Strategy) -> Result<(), RepositoryError>;

    async fn list(&self, enabled_only: bool) -> Result<Vec<Strategy>, RepositoryError>;
}

/// Cache errors. Callers treat the cache as advisory and fail open.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Ephemeral cache port (agent presence, counters, dedup locks).
///
/// Key namespace:
/// - `agent:<id>` agent JSON, 30 m TTL
/// - `agent:status:<id>` presence key, 2 m TTL
/// - `event:count:<cluster>:<severity>` counter, no TTL
/// - `lock:<key>` set-if-absent lock with TTL (dedup uses
///   `event:seen:<cluster>:<reason>:<name>` as the lock key)
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn cache_agent(&self, agent: &Agent, ttl: Duration) -> Result<(), CacheError>;

    async fn get_cached_agent(&self, id: &str) -> Result<Option<Agent>, CacheError>;

    async fn delete_cached_agent(&self, id: &str) -> Result<(), CacheError>;

    /// Write the short-TTL presence key asserting the agent is live.
    async fn set_agent_online(&self, id: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn is_agent_online(&self, id: &str) -> Result<bool, CacheError>;

    async fn increment_event_counter(
        &self,
        cluster_id: &str,
        severity: &str,
    ) -> Result<i64, CacheError>;

    async fn get_event_count(&self, cluster_id: &str, severity: &str) -> Result<i64, CacheError>;

    /// Set-if-absent lock. Returns `true` iff the lock was newly created;
    /// `false` means it was already held.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn release_lock(&self, key: &str) -> Result<(), CacheError>;

    /// Connectivity probe for readiness checks.
    async fn health(&self) -> Result<(), CacheError>;
}
