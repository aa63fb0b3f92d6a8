// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Domain Model
//!
//! Workflows are declarative diagnostic recipes: an ordered step list with
//! per-step conditions, retry policy and success/failure successor hints.
//! A `WorkflowExecution` is one run of a workflow; its step history is
//! append-only and its context keys are namespaced per step.
//!
//! # Invariants
//! - Step ids are unique within a workflow
//! - `on_success` / `on_failure` successor ids must resolve to existing steps
//! - Execution status transitions `pending → running → terminal`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// A declarative diagnostic workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// event, schedule, manual
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_config: HashMap<String, serde_json::Value>,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Validate structural invariants: unique step ids and resolvable
    /// successor references.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(WorkflowError::EmptyStepId);
            }
            if !ids.insert(step.id.as_str()) {
                return Err(WorkflowError::DuplicateStepId(step.id.clone()));
            }
        }
        for step in &self.steps {
            for successor in step.on_success.iter().chain(step.on_failure.iter()) {
                if !ids.contains(successor.as_str()) {
                    return Err(WorkflowError::UnresolvedSuccessor {
                        step_id: step.id.clone(),
                        successor: successor.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Inactive,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    #[default]
    Event,
    Schedule,
    Manual,
}

/// One step in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub r#type: StepType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    /// Successor step ids (declared, evaluated by the engine in step order).
    #[serde(default)]
    pub on_success: Vec<String>,
    #[serde(default)]
    pub on_failure: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Command,
    AiAnalysis,
    Decision,
    Remediation,
    Notification,
    Wait,
    /// Reserved; not executed in v1.
    Parallel,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::AiAnalysis => "ai_analysis",
            Self::Decision => "decision",
            Self::Remediation => "remediation",
            Self::Notification => "notification",
            Self::Wait => "wait",
            Self::Parallel => "parallel",
        }
    }
}

/// Gate on a step: every condition must hold against the execution context.
/// A missing field evaluates false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    /// eq, ne, gt, lt, contains
    pub operator: String,
    pub value: serde_json::Value,
}

impl Condition {
    pub fn evaluate(&self, context: &HashMap<String, serde_json::Value>) -> bool {
        let Some(value) = context.get(&self.field) else {
            return false;
        };
        match self.operator.as_str() {
            "eq" => value == &self.value,
            "ne" => value != &self.value,
            "gt" => match (value.as_f64(), self.value.as_f64()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            "lt" => match (value.as_f64(), self.value.as_f64()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
            "contains" => match (value.as_str(), self.value.as_str()) {
                (Some(a), Some(b)) => a.contains(b),
                _ => false,
            },
            _ => false,
        }
    }
}

/// Retry behavior for a failing step. Delay grows multiplicatively per
/// attempt and is clamped to `max_delay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// Delay before retry attempt `retry_count` (1-based):
    /// `initial × backoff^(retry_count − 1)`, clamped to `max_delay`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..retry_count {
            delay = delay.mul_f64(self.backoff_factor);
            if delay > self.max_delay {
                return self.max_delay;
            }
        }
        delay.min(self.max_delay)
    }
}

/// One run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub trigger_event: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub current_step_id: String,
    /// Append-only history, in step-list order.
    #[serde(default)]
    pub step_executions: Vec<StepExecution>,
    /// Accumulated step outputs, keyed `step_<id>_<k>`.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub error: String,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "humantime_serde")]
    pub duration: Duration,
}

impl WorkflowExecution {
    pub fn new(workflow_id: &str, trigger_event: HashMap<String, serde_json::Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            trigger_event,
            status: ExecutionStatus::Pending,
            current_step_id: String::new(),
            step_executions: Vec::new(),
            context: HashMap::new(),
            error: String::new(),
            started_at: Utc::now(),
            completed_at: None,
            duration: Duration::ZERO,
        }
    }

    /// Merge a step's output into the context under `step_<id>_<k>` keys.
    /// Keys from distinct steps never collide, so nothing is overwritten.
    pub fn merge_step_output(&mut self, step_id: &str, output: &HashMap<String, serde_json::Value>) {
        for (k, v) in output {
            self.context
                .insert(format!("step_{}_{}", step_id, k), v.clone());
        }
    }

    pub fn complete(&mut self, status: ExecutionStatus, error: impl Into<String>) {
        let completed_at = Utc::now();
        self.status = status;
        self.completed_at = Some(completed_at);
        self.duration = (completed_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let error = error.into();
        if !error.is_empty() {
            self.error = error;
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a single step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub input: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub output: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "humantime_serde")]
    pub duration: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("step id cannot be empty")]
    EmptyStepId,

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("step '{step_id}' references unknown successor '{successor}'")]
    UnresolvedSuccessor { step_id: String, successor: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            r#type: StepType::Notification,
            name: String::new(),
            description: String::new(),
            config: HashMap::new(),
            conditions: Vec::new(),
            timeout: None,
            retry_policy: None,
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }
    }

    fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
        Workflow {
            id: "w1".into(),
            name: "diagnose".into(),
            description: String::new(),
            trigger_type: TriggerType::Event,
            trigger_config: HashMap::new(),
            steps,
            status: WorkflowStatus::Active,
            priority: 0,
            timeout: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_duplicate_step_id() {
        let wf = workflow(vec![step("a"), step("a")]);
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::DuplicateStepId(_))
        ));
    }

    #[test]
    fn test_validate_unresolved_successor() {
        let mut failing = step("a");
        failing.on_failure.push("missing".into());
        let wf = workflow(vec![failing]);
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::UnresolvedSuccessor { .. })
        ));
    }

    #[test]
    fn test_validate_ok() {
        let mut first = step("a");
        first.on_success.push("b".into());
        let wf = workflow(vec![first, step("b")]);
        assert!(wf.validate().is_ok());
    }

    #[test]
    fn test_retry_delay_backoff_and_clamp() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff_factor: 2.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        // 400ms clamps to max_delay
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(4), Duration::from_millis(350));
    }

    #[test]
    fn test_condition_operators() {
        let mut ctx = HashMap::new();
        ctx.insert("root_cause".to_string(), serde_json::json!("OOM"));
        ctx.insert("score".to_string(), serde_json::json!(0.8));

        let eq = Condition {
            field: "root_cause".into(),
            operator: "eq".into(),
            value: serde_json::json!("OOM"),
        };
        assert!(eq.evaluate(&ctx));

        let ne = Condition {
            field: "root_cause".into(),
            operator: "ne".into(),
            value: serde_json::json!("Config"),
        };
        assert!(ne.evaluate(&ctx));

        let gt = Condition {
            field: "score".into(),
            operator: "gt".into(),
            value: serde_json::json!(0.5),
        };
        assert!(gt.evaluate(&ctx));

        let lt = Condition {
            field: "score".into(),
            operator: "lt".into(),
            value: serde_json::json!(0.5),
        };
        assert!(!lt.evaluate(&ctx));

        let contains = Condition {
            field: "root_cause".into(),
            operator: "contains".into(),
            value: serde_json::json!("OO"),
        };
        assert!(contains.evaluate(&ctx));
    }

    #[test]
    fn test_condition_missing_field_is_false() {
        let ctx = HashMap::new();
        let cond = Condition {
            field: "absent".into(),
            operator: "eq".into(),
            value: serde_json::json!("x"),
        };
        assert!(!cond.evaluate(&ctx));
    }

    #[test]
    fn test_merge_step_output_namespaces_keys() {
        let mut exec = WorkflowExecution::new("w1", HashMap::new());
        let mut output = HashMap::new();
        output.insert("root_cause".to_string(), serde_json::json!("OOM"));
        exec.merge_step_output("analyze", &output);
        assert_eq!(
            exec.context.get("step_analyze_root_cause"),
            Some(&serde_json::json!("OOM"))
        );
    }

    #[test]
    fn test_execution_complete_sets_duration() {
        let mut exec = WorkflowExecution::new("w1", HashMap::new());
        exec.status = ExecutionStatus::Running;
        exec.complete(ExecutionStatus::Completed, "");
        assert!(exec.is_terminal());
        assert!(exec.completed_at.is_some());
        assert!(exec.error.is_empty());
    }
}
