// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Step Executor
//!
//! One handler per step type. The `command` and `ai_analysis` handlers call
//! external collaborators through the [`CommandApi`] / [`AnalysisApi`] ports;
//! `remediation` and `notification` are log-only hook points; `wait` sleeps
//! and honors cancellation; `parallel` is reserved.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::workflow::{StepType, WorkflowExecution, WorkflowStep};

/// Poll cadence for command results.
pub const RESULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long the command handler waits for a result before giving up.
pub const RESULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("invalid step config: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Upstream(String),

    #[error("timeout waiting for command result")]
    ResultTimeout,

    #[error("step cancelled")]
    Cancelled,

    #[error("unknown step type: {0}")]
    UnknownStepType(String),
}

/// Agent-manager command REST surface, as seen by the engine.
#[async_trait]
pub trait CommandApi: Send + Sync {
    /// POST a command; the response carries the assigned command id.
    async fn dispatch(&self, request: serde_json::Value) -> Result<serde_json::Value, StepError>;

    /// GET a command result; `None` while not ready.
    async fn fetch_result(&self, command_id: &str)
        -> Result<Option<serde_json::Value>, StepError>;
}

/// Reasoning-service analysis surface.
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    async fn analyze(&self, request: serde_json::Value) -> Result<serde_json::Value, StepError>;
}

pub struct StepExecutor {
    command_api: Arc<dyn CommandApi>,
    analysis_api: Arc<dyn AnalysisApi>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl StepExecutor {
    pub fn new(command_api: Arc<dyn CommandApi>, analysis_api: Arc<dyn AnalysisApi>) -> Self {
        Self {
            command_api,
            analysis_api,
            poll_interval: RESULT_POLL_INTERVAL,
            poll_timeout: RESULT_POLL_TIMEOUT,
        }
    }

    /// Override poll timings (tests).
    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }

    pub async fn execute(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, serde_json::Value>, StepError> {
        match step.r#type {
            StepType::Command => self.execute_command(execution, step, cancel).await,
            StepType::AiAnalysis => self.execute_ai_analysis(execution, step).await,
            StepType::Decision => self.execute_decision(execution, step),
            StepType::Remediation => self.execute_remediation(execution, step),
            StepType::Notification => self.execute_notification(execution, step),
            StepType::Wait => self.execute_wait(execution, step, cancel).await,
            StepType::Parallel => Err(StepError::UnknownStepType("parallel".into())),
        }
    }

    /// Dispatch a diagnostic command through the agent-manager REST surface
    /// and poll for its result.
    async fn execute_command(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, serde_json::Value>, StepError> {
        info!(execution_id = %execution.id, step_id = %step.id, "executing command step");

        let mut cluster_id = config_str(step, "cluster_id");
        if cluster_id.is_empty() {
            // Fall back to the trigger event.
            cluster_id = execution
                .trigger_event
                .get("payload")
                .and_then(|p| p.get("cluster_id"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
        }

        let request = serde_json::json!({
            "cluster_id": cluster_id,
            "type": "diagnostic",
            "tool": config_str(step, "tool"),
            "action": config_str(step, "action"),
            "args": step.config.get("args").cloned().unwrap_or(serde_json::json!([])),
            "timeout": "30s",
            "issued_by": "workflow-engine",
            "correlation_id": execution.id,
        });

        let response = self.command_api.dispatch(request).await?;
        let command_id = response
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StepError::Upstream("dispatch response missing command id".into()))?
            .to_string();

        let result = self.wait_for_result(&command_id, cancel).await?;

        let mut output = HashMap::new();
        output.insert("command_id".into(), serde_json::json!(command_id));
        output.insert("result".into(), result);
        Ok(output)
    }

    async fn wait_for_result(
        &self,
        command_id: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, StepError> {
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(StepError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StepError::ResultTimeout);
            }
            if let Some(result) = self.command_api.fetch_result(command_id).await? {
                return Ok(result);
            }
        }
    }

    /// Synchronous root-cause request against the reasoning service.
    async fn execute_ai_analysis(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
    ) -> Result<HashMap<String, serde_json::Value>, StepError> {
        info!(execution_id = %execution.id, step_id = %step.id, "executing ai analysis step");

        let request = serde_json::json!({
            "request_id": format!("{}-{}", execution.id, step.id),
            "workflow_id": execution.workflow_id,
            "analysis_type": step.config.get("analysis_type").cloned()
                .unwrap_or(serde_json::json!("root_cause")),
            "context": {
                "event": execution.trigger_event,
                "execution": execution.context,
                "step_config": step.config,
            },
            "options": {
                "timeout": "30s",
                "min_confidence": 0.7,
            },
        });

        let response = self.analysis_api.analyze(request).await?;
        Ok(value_to_map(response))
    }

    /// First matching `{if, then}` wins; no match yields the default branch.
    fn execute_decision(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
    ) -> Result<HashMap<String, serde_json::Value>, StepError> {
        info!(execution_id = %execution.id, step_id = %step.id, "executing decision step");

        let conditions = step
            .config
            .get("conditions")
            .and_then(|v| v.as_array())
            .ok_or_else(|| StepError::InvalidConfig("decision requires conditions".into()))?;

        for condition in conditions {
            let if_expr = condition.get("if").and_then(|v| v.as_str()).unwrap_or("");
            let then_action = condition.get("then").and_then(|v| v.as_str()).unwrap_or("");
            if evaluate_expression(execution, if_expr) {
                info!(
                    execution_id = %execution.id,
                    action = %then_action,
                    "decision condition matched"
                );
                let mut output = HashMap::new();
                output.insert("decision".into(), serde_json::json!(then_action));
                output.insert("condition".into(), serde_json::json!(if_expr));
                output.insert("matched".into(), serde_json::json!(true));
                return Ok(output);
            }
        }

        let mut output = HashMap::new();
        output.insert("decision".into(), serde_json::json!("default"));
        output.insert("matched".into(), serde_json::json!(false));
        Ok(output)
    }

    /// Hook point for automated remediation; logs only.
    fn execute_remediation(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
    ) -> Result<HashMap<String, serde_json::Value>, StepError> {
        let action_type = config_str(step, "action_type");
        let action = config_str(step, "action");
        info!(
            execution_id = %execution.id,
            step_id = %step.id,
            action_type = %action_type,
            action = %action,
            "executing remediation action"
        );

        let mut output = HashMap::new();
        output.insert("action_type".into(), serde_json::json!(action_type));
        output.insert("action".into(), serde_json::json!(action));
        output.insert("status".into(), serde_json::json!("completed"));
        output.insert(
            "message".into(),
            serde_json::json!(format!("remediation action {} executed", action)),
        );
        Ok(output)
    }

    /// Hook point for notification channels; logs only.
    fn execute_notification(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
    ) -> Result<HashMap<String, serde_json::Value>, StepError> {
        let channel = config_str(step, "channel");
        let message = config_str(step, "message");
        info!(
            execution_id = %execution.id,
            step_id = %step.id,
            channel = %channel,
            message = %message,
            "sending notification"
        );

        let mut output = HashMap::new();
        output.insert("channel".into(), serde_json::json!(channel));
        output.insert("message".into(), serde_json::json!(message));
        output.insert("sent_at".into(), serde_json::json!(Utc::now()));
        output.insert("status".into(), serde_json::json!("sent"));
        Ok(output)
    }

    /// Sleep for `config.duration`; cancellation interrupts immediately.
    async fn execute_wait(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, serde_json::Value>, StepError> {
        let duration_str = config_str(step, "duration");
        let duration = humantime::parse_duration(&duration_str)
            .map_err(|e| StepError::InvalidConfig(format!("invalid duration: {e}")))?;

        info!(
            execution_id = %execution.id,
            step_id = %step.id,
            duration_ms = duration.as_millis() as u64,
            "waiting"
        );

        tokio::select! {
            _ = cancel.cancelled() => Err(StepError::Cancelled),
            _ = tokio::time::sleep(duration) => {
                let mut output = HashMap::new();
                output.insert("waited".into(), serde_json::json!(duration_str));
                Ok(output)
            }
        }
    }
}

fn config_str(step: &WorkflowStep, key: &str) -> String {
    step.config
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn value_to_map(value: serde_json::Value) -> HashMap<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        other => {
            let mut map = HashMap::new();
            map.insert("result".into(), other);
            map
        }
    }
}

/// Evaluate a decision expression of the form `field.path == 'value'`.
///
/// The left side resolves against the execution context (dots folded to
/// underscores, e.g. `analysis.root_cause` → `analysis_root_cause`), falling
/// back to the trigger event payload for bare fields like `severity`.
fn evaluate_expression(execution: &WorkflowExecution, expression: &str) -> bool {
    let Some((field, expected)) = expression.split_once("==") else {
        return false;
    };
    let field = field.trim();
    let expected = expected.trim().trim_matches('\'').trim_matches('"');

    let context_key = field.replace('.', "_");
    if let Some(actual) = execution.context.get(&context_key).and_then(|v| v.as_str()) {
        return actual == expected;
    }

    let payload_field = field.rsplit('.').next().unwrap_or(field);
    execution
        .trigger_event
        .get("payload")
        .and_then(|p| p.get(payload_field))
        .and_then(|v| v.as_str())
        .map(|actual| actual == expected)
        .unwrap_or(false)
}
