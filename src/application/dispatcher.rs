// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Command Dispatcher (Application Service)
//!
//! Validates, persists and publishes read-only diagnostic commands, tracks
//! outstanding ones, and correlates asynchronous results back to them.
//!
//! Per command there is an independent wall-clock timer; a result arriving
//! first cancels it. A timer firing after the result was handled finds the
//! command id absent and is a no-op. One lock guards the pending map and the
//! timer map and is never held across an await.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::registry::{AgentRegistry, RegistryError};
use crate::domain::command::{Command, CommandResult, CommandStatus};
use crate::domain::repository::{CommandRepository, RepositoryError};
use crate::infrastructure::bus::{subjects, MessageBus};

/// Tools the control plane will dispatch. The agent side enforces a second,
/// stricter list.
pub const ALLOWED_TOOLS: [&str; 7] = ["kubectl", "ps", "df", "netstat", "curl", "ping", "top"];

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Caller fault; surfaced as 400 and never retried.
    #[error("command validation failed: {0}")]
    Validation(String),

    #[error("target cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("target agent is not online: {0}")]
    AgentUnavailable(String),

    #[error(transparent)]
    Store(#[from] RepositoryError),

    #[error("failed to publish command: {0}")]
    Bus(String),
}

impl From<RegistryError> for DispatchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(msg) => DispatchError::Validation(msg),
            RegistryError::NotFound(msg) => DispatchError::ClusterNotFound(msg),
            RegistryError::Store(e) => DispatchError::Store(e),
        }
    }
}

#[derive(Default)]
struct DispatchState {
    pending: HashMap<String, Command>,
    timers: HashMap<String, JoinHandle<()>>,
}

/// Dispatches commands to agents over the bus and tracks them to completion.
pub struct CommandDispatcher {
    store: Arc<dyn CommandRepository>,
    registry: Arc<AgentRegistry>,
    bus: Arc<dyn MessageBus>,
    state: Mutex<DispatchState>,

    commands_issued: AtomicU64,
    commands_completed: AtomicU64,
    commands_failed: AtomicU64,
    commands_timeout: AtomicU64,
}

impl CommandDispatcher {
    pub fn new(
        store: Arc<dyn CommandRepository>,
        registry: Arc<AgentRegistry>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            state: Mutex::new(DispatchState::default()),
            commands_issued: AtomicU64::new(0),
            commands_completed: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            commands_timeout: AtomicU64::new(0),
        }
    }

    /// Validate, persist, publish and track a command.
    pub async fn dispatch(self: &Arc<Self>, mut cmd: Command) -> Result<Command, DispatchError> {
        Self::validate(&cmd)?;

        if cmd.id.is_empty() {
            cmd.id = uuid::Uuid::new_v4().to_string();
        }
        if cmd.timeout.is_zero() {
            cmd.timeout = DEFAULT_COMMAND_TIMEOUT;
        }
        cmd.status = CommandStatus::Pending;
        cmd.created_at = Utc::now();
        cmd.updated_at = Utc::now();

        let agent = self
            .registry
            .get_by_cluster_id(&cmd.cluster_id)
            .await?
            .ok_or_else(|| DispatchError::ClusterNotFound(cmd.cluster_id.clone()))?;
        if !agent.is_online() {
            return Err(DispatchError::AgentUnavailable(cmd.cluster_id.clone()));
        }

        self.store.insert(&cmd).await?;

        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .insert(cmd.id.clone(), cmd.clone());
        self.schedule_timeout(&cmd);

        let subject = subjects::command(&cmd.cluster_id);
        let payload =
            serde_json::to_vec(&cmd).map_err(|e| DispatchError::Bus(e.to_string()))?;
        if let Err(e) = self.bus.publish(&subject, payload).await {
            self.update_status(&cmd.id, CommandStatus::Failed).await;
            self.cancel_timeout(&cmd.id);
            self.remove_pending(&cmd.id);
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
            return Err(DispatchError::Bus(e.to_string()));
        }

        self.update_status(&cmd.id, CommandStatus::Sent).await;
        cmd.status = CommandStatus::Sent;
        if let Some(tracked) = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .get_mut(&cmd.id)
        {
            tracked.status = CommandStatus::Sent;
        }

        self.commands_issued.fetch_add(1, Ordering::Relaxed);

        info!(
            command_id = %cmd.id,
            cluster_id = %cmd.cluster_id,
            tool = %cmd.tool,
            timeout_secs = cmd.timeout.as_secs(),
            "command dispatched"
        );
        Ok(cmd)
    }

    /// Handle a command result from an agent. Safe to call twice for the same
    /// command id; the second call finds the timer already gone.
    pub async fn handle_result(&self, mut result: CommandResult) -> Result<(), DispatchError> {
        if result.id.is_empty() {
            result.id = uuid::Uuid::new_v4().to_string();
        }
        result.truncate_output();

        self.store.insert_result(&result).await?;

        let status = if result.status == "success" {
            self.commands_completed.fetch_add(1, Ordering::Relaxed);
            CommandStatus::Completed
        } else {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
            CommandStatus::Failed
        };
        self.update_status(&result.command_id, status).await;

        self.cancel_timeout(&result.command_id);
        self.remove_pending(&result.command_id);

        info!(
            command_id = %result.command_id,
            status = %result.status,
            execution_time_ms = result.execution_time.as_millis() as u64,
            "command result processed"
        );
        Ok(())
    }

    pub async fn get_command(&self, command_id: &str) -> Result<Option<Command>, DispatchError> {
        Ok(self.store.find_by_id(command_id).await?)
    }

    pub async fn get_result(
        &self,
        command_id: &str,
    ) -> Result<Option<CommandResult>, DispatchError> {
        Ok(self.store.find_result(command_id).await?)
    }

    /// Snapshot of commands awaiting a result or timeout.
    pub fn pending_commands(&self) -> Vec<Command> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .values()
            .cloned()
            .collect()
    }

    /// Abort all outstanding timers. Pending commands are left to the store.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for (_, timer) in state.timers.drain() {
            timer.abort();
        }
    }

    pub fn statistics(&self) -> serde_json::Value {
        let pending = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .len();
        serde_json::json!({
            "commands_issued": self.commands_issued.load(Ordering::Relaxed),
            "commands_completed": self.commands_completed.load(Ordering::Relaxed),
            "commands_failed": self.commands_failed.load(Ordering::Relaxed),
            "commands_timeout": self.commands_timeout.load(Ordering::Relaxed),
            "pending_commands": pending,
        })
    }

    fn validate(cmd: &Command) -> Result<(), DispatchError> {
        if cmd.cluster_id.is_empty() {
            return Err(DispatchError::Validation("cluster_id is required".into()));
        }
        if cmd.r#type.is_empty() {
            return Err(DispatchError::Validation("command type is required".into()));
        }
        if cmd.tool.is_empty() {
            return Err(DispatchError::Validation("tool is required".into()));
        }
        if cmd.action.is_empty() {
            return Err(DispatchError::Validation("action is required".into()));
        }
        if !ALLOWED_TOOLS.contains(&cmd.tool.as_str()) {
            return Err(DispatchError::Validation(format!(
                "tool '{}' is not allowed",
                cmd.tool
            )));
        }
        Ok(())
    }

    async fn update_status(&self, command_id: &str, status: CommandStatus) {
        if let Err(e) = self.store.update_status(command_id, status).await {
            warn!(command_id = %command_id, error = %e, "failed to update command status");
        }
    }

    fn schedule_timeout(self: &Arc<Self>, cmd: &Command) {
        let dispatcher = Arc::clone(self);
        let command_id = cmd.id.clone();
        let timeout = cmd.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            dispatcher.handle_timeout(&command_id).await;
        });
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .timers
            .insert(cmd.id.clone(), timer);
    }

    fn cancel_timeout(&self, command_id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = state.timers.remove(command_id) {
            timer.abort();
        }
    }

    fn remove_pending(&self, command_id: &str) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .remove(command_id);
    }

    /// Timer callback. Timeout is terminal; operators re-issue.
    async fn handle_timeout(&self, command_id: &str) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.pending.remove(command_id).is_none() {
                // Result beat the timer; nothing to do.
                return;
            }
            state.timers.remove(command_id);
        }

        self.commands_timeout.fetch_add(1, Ordering::Relaxed);
        warn!(command_id = %command_id, "command timeout");

        if let Err(e) = self
            .store
            .update_status(command_id, CommandStatus::Timeout)
            .await
        {
            error!(command_id = %command_id, error = %e, "failed to persist timeout status");
        }
    }
}
