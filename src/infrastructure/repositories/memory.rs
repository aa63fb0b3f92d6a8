// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory repository implementations.
//!
//! Used by the test suite and available for storeless development runs.
//! Semantics mirror the PostgreSQL repositories, including upsert-by-id and
//! insert-once behavior for events and results.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::agent::{Agent, AgentStatus};
use crate::domain::cluster::Cluster;
use crate::domain::command::{Command, CommandResult, CommandStatus};
use crate::domain::event::Event;
use crate::domain::repository::{
    AgentRepository, ClusterRepository, CommandRepository, EventQuery, EventRepository,
    ExecutionRepository, RepositoryError, StrategyRepository, WorkflowRepository,
};
use crate::domain::strategy::Strategy;
use crate::domain::workflow::{Workflow, WorkflowExecution};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

pub struct InMemoryAgentRepository {
    agents: Mutex<HashMap<String, Agent>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryAgentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError> {
        lock(&self.agents).insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Agent>, RepositoryError> {
        Ok(lock(&self.agents).get(id).cloned())
    }

    async fn find_by_cluster_id(&self, cluster_id: &str) -> Result<Option<Agent>, RepositoryError> {
        Ok(lock(&self.agents)
            .values()
            .find(|a| a.cluster_id == cluster_id)
            .cloned())
    }

    async fn list(&self, status: Option<AgentStatus>) -> Result<Vec<Agent>, RepositoryError> {
        let agents = lock(&self.agents);
        Ok(agents
            .values()
            .filter(|a| status.map(|s| a.status == s).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: &str, status: AgentStatus) -> Result<(), RepositoryError> {
        if let Some(agent) = lock(&self.agents).get_mut(id) {
            agent.status = status;
            agent.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        if let Some(agent) = lock(&self.agents).get_mut(id) {
            agent.last_heartbeat = at;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        lock(&self.agents).remove(id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Clusters
// ---------------------------------------------------------------------------

pub struct InMemoryClusterRepository {
    clusters: Mutex<HashMap<String, Cluster>>,
}

impl InMemoryClusterRepository {
    pub fn new() -> Self {
        Self {
            clusters: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryClusterRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterRepository for InMemoryClusterRepository {
    async fn save(&self, cluster: &Cluster) -> Result<(), RepositoryError> {
        lock(&self.clusters).insert(cluster.id.clone(), cluster.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Cluster>, RepositoryError> {
        Ok(lock(&self.clusters).get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Cluster>, RepositoryError> {
        Ok(lock(&self.clusters).values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        lock(&self.clusters).remove(id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub struct InMemoryEventRepository {
    events: Mutex<Vec<Event>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of everything inserted, in arrival order.
    pub fn all(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }
}

impl Default for InMemoryEventRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn insert(&self, event: &Event) -> Result<(), RepositoryError> {
        lock(&self.events).push(event.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Event>, RepositoryError> {
        Ok(lock(&self.events).iter().find(|e| e.id == id).cloned())
    }

    async fn search(&self, query: &EventQuery) -> Result<Vec<Event>, RepositoryError> {
        let events = lock(&self.events);
        let mut matched: Vec<Event> = events
            .iter()
            .filter(|e| {
                query
                    .cluster_id
                    .as_ref()
                    .map(|c| &e.cluster_id == c)
                    .unwrap_or(true)
                    && query
                        .severity
                        .as_ref()
                        .map(|s| e.severity.as_str() == s.as_str())
                        .unwrap_or(true)
                    && query
                        .namespace
                        .as_ref()
                        .map(|n| &e.namespace == n)
                        .unwrap_or(true)
                    && query.start_time.map(|t| e.timestamp >= t).unwrap_or(true)
                    && query.end_time.map(|t| e.timestamp <= t).unwrap_or(true)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if query.limit > 0 {
            matched.truncate(query.limit as usize);
        }
        Ok(matched)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub struct InMemoryCommandRepository {
    commands: Mutex<HashMap<String, Command>>,
    results: Mutex<HashMap<String, CommandResult>>,
}

impl InMemoryCommandRepository {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
        }
    }

    pub fn all(&self) -> Vec<Command> {
        lock(&self.commands).values().cloned().collect()
    }
}

impl Default for InMemoryCommandRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRepository for InMemoryCommandRepository {
    async fn insert(&self, command: &Command) -> Result<(), RepositoryError> {
        lock(&self.commands).insert(command.id.clone(), command.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Command>, RepositoryError> {
        Ok(lock(&self.commands).get(id).cloned())
    }

    async fn update_status(&self, id: &str, status: CommandStatus) -> Result<(), RepositoryError> {
        if let Some(command) = lock(&self.commands).get_mut(id) {
            command.status = status;
            command.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_result(&self, result: &CommandResult) -> Result<(), RepositoryError> {
        // At most one result per command.
        lock(&self.results)
            .entry(result.command_id.clone())
            .or_insert_with(|| result.clone());
        Ok(())
    }

    async fn find_result(
        &self,
        command_id: &str,
    ) -> Result<Option<CommandResult>, RepositoryError> {
        Ok(lock(&self.results).get(command_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

pub struct InMemoryWorkflowRepository {
    workflows: Mutex<HashMap<String, Workflow>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self {
            workflows: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryWorkflowRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        lock(&self.workflows).insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Workflow>, RepositoryError> {
        Ok(lock(&self.workflows).get(id).cloned())
    }

}

// ---------------------------------------------------------------------------
// Workflow executions
// ---------------------------------------------------------------------------

pub struct InMemoryExecutionRepository {
    executions: Mutex<HashMap<String, WorkflowExecution>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self {
            executions: Mutex::new(HashMap::new()),
        }
    }

    pub fn all(&self) -> Vec<WorkflowExecution> {
        lock(&self.executions).values().cloned().collect()
    }
}

impl Default for InMemoryExecutionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        lock(&self.executions).insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(lock(&self.executions).get(id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

pub struct InMemoryStrategyRepository {
    strategies: Mutex<HashMap<String, Strategy>>,
}

impl InMemoryStrategyRepository {
    pub fn new() -> Self {
        Self {
            strategies: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStrategyRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StrategyRepository for InMemoryStrategyRepository {
    async fn save(&self, strategy: &Strategy) -> Result<(), RepositoryError> {
        lock(&self.strategies).insert(strategy.id.clone(), strategy.clone());
        Ok(())
    }

    async fn list(&self, enabled_only: bool) -> Result<Vec<Strategy>, RepositoryError> {
        Ok(lock(&self.strategies)
            .values()
            .filter(|s| !enabled_only || s.enabled)
            .cloned()
            .collect())
    }
}
