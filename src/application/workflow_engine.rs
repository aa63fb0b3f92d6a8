// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Engine (Application Service)
//!
//! Each started workflow spawns one asynchronous owner task that walks the
//! step list sequentially. Steps run one at a time within an execution;
//! multiple executions run concurrently, each with its own context map.
//!
//! State is persisted on every status transition and after each step, so the
//! store wins on restart. Cancellation is recorded immediately; the owner
//! task observes it between steps and inside cancellable steps (wait, result
//! polling).

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::application::step_executor::{StepError, StepExecutor};
use crate::domain::repository::{ExecutionRepository, RepositoryError, WorkflowRepository};
use crate::domain::workflow::{
    ExecutionStatus, StepExecution, Workflow, WorkflowExecution, WorkflowStep,
};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("workflow is not active: {0}")]
    WorkflowInactive(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    #[error(transparent)]
    Store(#[from] RepositoryError),
}

struct ActiveExecution {
    snapshot: WorkflowExecution,
    cancel: CancellationToken,
}

/// Executes workflow step lists with retry, conditions and branching hooks.
pub struct WorkflowEngine {
    workflows: Arc<dyn WorkflowRepository>,
    executions: Arc<dyn ExecutionRepository>,
    executor: Arc<StepExecutor>,
    active: Mutex<HashMap<String, ActiveExecution>>,

    executions_started: AtomicU64,
    executions_completed: AtomicU64,
    executions_failed: AtomicU64,
}

impl WorkflowEngine {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        executions: Arc<dyn ExecutionRepository>,
        executor: Arc<StepExecutor>,
    ) -> Self {
        Self {
            workflows,
            executions,
            executor,
            active: Mutex::new(HashMap::new()),
            executions_started: AtomicU64::new(0),
            executions_completed: AtomicU64::new(0),
            executions_failed: AtomicU64::new(0),
        }
    }

    /// Start a new execution of an active workflow. Returns promptly; the
    /// owner task continues asynchronously.
    pub async fn start_workflow(
        self: &Arc<Self>,
        workflow_id: &str,
        trigger_event: HashMap<String, serde_json::Value>,
    ) -> Result<WorkflowExecution, EngineError> {
        let workflow = self
            .workflows
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;
        if !workflow.is_active() {
            return Err(EngineError::WorkflowInactive(workflow_id.to_string()));
        }

        let execution = WorkflowExecution::new(workflow_id, trigger_event);
        self.executions.save(&execution).await?;

        let cancel = CancellationToken::new();
        self.active.lock().unwrap_or_else(|e| e.into_inner()).insert(
            execution.id.clone(),
            ActiveExecution {
                snapshot: execution.clone(),
                cancel: cancel.clone(),
            },
        );
        self.executions_started.fetch_add(1, Ordering::Relaxed);

        let engine = Arc::clone(self);
        let owned = execution.clone();
        tokio::spawn(async move { engine.run_execution(workflow, owned, cancel).await });

        info!(
            execution_id = %execution.id,
            workflow_id = %workflow_id,
            "workflow execution started"
        );
        Ok(execution)
    }

    /// Mark an execution cancelled and persist it. The owner task notices
    /// between steps and inside cancellable steps.
    pub async fn cancel_execution(&self, execution_id: &str) -> Result<(), EngineError> {
        let snapshot = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            let entry = active
                .get_mut(execution_id)
                .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;
            entry.cancel.cancel();
            entry.snapshot.complete(ExecutionStatus::Cancelled, "");
            entry.snapshot.clone()
        };
        self.executions.save(&snapshot).await?;
        info!(execution_id = %execution_id, "workflow execution cancelled");
        Ok(())
    }

    /// Live snapshot first, store second.
    pub async fn get_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<WorkflowExecution>, EngineError> {
        if let Some(entry) = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(execution_id)
        {
            return Ok(Some(entry.snapshot.clone()));
        }
        Ok(self.executions.find_by_id(execution_id).await?)
    }

    /// Cancel every active execution (shutdown path).
    pub fn stop(&self) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        for entry in active.values() {
            entry.cancel.cancel();
        }
    }

    pub fn statistics(&self) -> serde_json::Value {
        let active = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        serde_json::json!({
            "active_executions": active,
            "executions_started": self.executions_started.load(Ordering::Relaxed),
            "executions_completed": self.executions_completed.load(Ordering::Relaxed),
            "executions_failed": self.executions_failed.load(Ordering::Relaxed),
        })
    }

    async fn run_execution(
        self: Arc<Self>,
        workflow: Workflow,
        mut execution: WorkflowExecution,
        cancel: CancellationToken,
    ) {
        execution.status = ExecutionStatus::Running;
        self.persist(&execution).await;

        for (index, step) in workflow.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                self.drop_active(&execution.id);
                return;
            }

            if !Self::should_execute_step(&execution, step) {
                debug!(
                    execution_id = %execution.id,
                    step_id = %step.id,
                    "skipping step, conditions not met"
                );
                continue;
            }

            info!(
                execution_id = %execution.id,
                step_id = %step.id,
                step_index = index,
                "executing workflow step"
            );
            execution.current_step_id = step.id.clone();

            let step_exec = match self.execute_step(&execution, step, &cancel).await {
                Some(step_exec) => step_exec,
                None => {
                    // Cancelled mid-step; cancellation already persisted.
                    self.drop_active(&execution.id);
                    return;
                }
            };

            if cancel.is_cancelled() {
                // Cancellation was recorded while the step ran; leave the
                // persisted cancelled state untouched.
                self.drop_active(&execution.id);
                return;
            }

            let failed = step_exec.status == ExecutionStatus::Failed;
            let step_error = step_exec.error.clone();
            execution.merge_step_output(&step.id, &step_exec.output);
            execution.step_executions.push(step_exec);
            self.persist(&execution).await;

            if failed {
                if !step.on_failure.is_empty() {
                    // Failure branches are declared but not resolved; the
                    // execution still terminates as failed.
                    info!(
                        execution_id = %execution.id,
                        step_id = %step.id,
                        successors = ?step.on_failure,
                        "failure branch declared for failed step"
                    );
                }
                error!(
                    execution_id = %execution.id,
                    step_id = %step.id,
                    error = %step_error,
                    "step execution failed"
                );
                self.complete_execution(
                    execution,
                    ExecutionStatus::Failed,
                    format!("step {} failed: {}", step.id, step_error),
                )
                .await;
                return;
            }
        }

        self.complete_execution(execution, ExecutionStatus::Completed, String::new())
            .await;
    }

    /// Run one step, applying its retry policy. Returns `None` when the
    /// execution was cancelled mid-step.
    async fn execute_step(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        cancel: &CancellationToken,
    ) -> Option<StepExecution> {
        let input = Self::prepare_step_input(execution, step);
        let mut retry_count: u32 = 0;

        loop {
            let started_at = Utc::now();
            let attempt = match step.timeout {
                Some(timeout) => match tokio::time::timeout(
                    timeout,
                    self.executor.execute(execution, step, cancel),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StepError::Upstream(format!(
                        "step timed out after {}s",
                        timeout.as_secs()
                    ))),
                },
                None => self.executor.execute(execution, step, cancel).await,
            };
            let completed_at = Utc::now();
            let duration = (completed_at - started_at)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);

            match attempt {
                Ok(output) => {
                    return Some(StepExecution {
                        step_id: step.id.clone(),
                        status: ExecutionStatus::Completed,
                        input,
                        output,
                        error: String::new(),
                        retry_count,
                        started_at,
                        completed_at: Some(completed_at),
                        duration,
                    });
                }
                Err(StepError::Cancelled) => return None,
                Err(e) => {
                    if let Some(policy) = &step.retry_policy {
                        if retry_count < policy.max_retries {
                            retry_count += 1;
                            let delay = policy.delay_for(retry_count);
                            info!(
                                execution_id = %execution.id,
                                step_id = %step.id,
                                retry_count,
                                delay_ms = delay.as_millis() as u64,
                                "retrying step"
                            );
                            tokio::select! {
                                _ = cancel.cancelled() => return None,
                                _ = tokio::time::sleep(delay) => {}
                            }
                            continue;
                        }
                    }
                    return Some(StepExecution {
                        step_id: step.id.clone(),
                        status: ExecutionStatus::Failed,
                        input,
                        output: HashMap::new(),
                        error: e.to_string(),
                        retry_count,
                        started_at,
                        completed_at: Some(completed_at),
                        duration,
                    });
                }
            }
        }
    }

    /// Every condition must hold against the execution context. Skipped
    /// steps touch neither context nor history.
    fn should_execute_step(execution: &WorkflowExecution, step: &WorkflowStep) -> bool {
        step.conditions
            .iter()
            .all(|condition| condition.evaluate(&execution.context))
    }

    fn prepare_step_input(
        execution: &WorkflowExecution,
        step: &WorkflowStep,
    ) -> HashMap<String, serde_json::Value> {
        let mut input = step.config.clone();
        input.insert("execution_id".into(), serde_json::json!(execution.id));
        input.insert("workflow_id".into(), serde_json::json!(execution.workflow_id));
        input.insert(
            "trigger_event".into(),
            serde_json::json!(execution.trigger_event),
        );
        input
    }

    async fn complete_execution(
        &self,
        mut execution: WorkflowExecution,
        status: ExecutionStatus,
        error: String,
    ) {
        execution.complete(status, error);
        self.persist(&execution).await;

        match status {
            ExecutionStatus::Completed => {
                self.executions_completed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.executions_failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        info!(
            execution_id = %execution.id,
            status = %execution.status,
            duration_ms = execution.duration.as_millis() as u64,
            "workflow execution completed"
        );
        self.drop_active(&execution.id);
    }

    /// Persist and refresh the live snapshot. Store failures are logged; the
    /// store wins on restart either way.
    async fn persist(&self, execution: &WorkflowExecution) {
        if let Err(e) = self.executions.save(execution).await {
            error!(execution_id = %execution.id, error = %e, "failed to persist execution");
        }
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = active.get_mut(&execution.id) {
            // A cancellation recorded concurrently must not be overwritten.
            if entry.snapshot.status != ExecutionStatus::Cancelled {
                entry.snapshot = execution.clone();
            }
        }
    }

    fn drop_active(&self, execution_id: &str) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(execution_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::step_executor::{AnalysisApi, CommandApi};
    use crate::domain::workflow::{WorkflowStatus, WorkflowStep};
    use crate::infrastructure::repositories::memory::{
        InMemoryExecutionRepository, InMemoryWorkflowRepository,
    };
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct NoCommandApi;

    #[async_trait]
    impl CommandApi for NoCommandApi {
        async fn dispatch(&self, _: serde_json::Value) -> Result<serde_json::Value, StepError> {
            Err(StepError::Upstream("no command api in this test".into()))
        }
        async fn fetch_result(
            &self,
            _: &str,
        ) -> Result<Option<serde_json::Value>, StepError> {
            Ok(None)
        }
    }

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyAnalysisApi {
        failures: AtomicU32,
    }

    #[async_trait]
    impl AnalysisApi for FlakyAnalysisApi {
        async fn analyze(&self, _: serde_json::Value) -> Result<serde_json::Value, StepError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(StepError::Upstream("reasoning service unavailable".into()))
            } else {
                Ok(serde_json::json!({ "root_cause": "OOM", "confidence": 0.9 }))
            }
        }
    }

    struct Fixture {
        workflows: Arc<InMemoryWorkflowRepository>,
        executions: Arc<InMemoryExecutionRepository>,
        engine: Arc<WorkflowEngine>,
    }

    fn fixture(analysis_failures: u32) -> Fixture {
        let workflows = Arc::new(InMemoryWorkflowRepository::new());
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let executor = Arc::new(StepExecutor::new(
            Arc::new(NoCommandApi),
            Arc::new(FlakyAnalysisApi {
                failures: AtomicU32::new(analysis_failures),
            }),
        ));
        let engine = Arc::new(WorkflowEngine::new(
            Arc::clone(&workflows) as Arc<dyn WorkflowRepository>,
            Arc::clone(&executions) as Arc<dyn ExecutionRepository>,
            executor,
        ));
        Fixture {
            workflows,
            executions,
            engine,
        }
    }

    fn workflow(id: &str, steps: serde_json::Value) -> Workflow {
        let mut wf: Workflow = serde_json::from_value(serde_json::json!({
            "id": id,
            "name": id,
            "trigger_type": "event",
            "steps": steps,
        }))
        .unwrap();
        wf.status = WorkflowStatus::Active;
        wf
    }

    async fn wait_terminal(f: &Fixture, execution_id: &str) -> WorkflowExecution {
        for _ in 0..200 {
            if let Some(exec) = f.executions.find_by_id(execution_id).await.unwrap() {
                if exec.is_terminal() {
                    return exec;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {execution_id} did not reach a terminal state");
    }

    #[tokio::test]
    async fn test_unknown_workflow_rejected() {
        let f = fixture(0);
        let err = f
            .engine
            .start_workflow("missing", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn test_inactive_workflow_rejected() {
        let f = fixture(0);
        let mut wf = workflow("w1", serde_json::json!([]));
        wf.status = WorkflowStatus::Draft;
        f.workflows.save(&wf).await.unwrap();

        let err = f
            .engine
            .start_workflow("w1", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowInactive(_)));
    }

    #[tokio::test]
    async fn test_steps_run_in_order_and_fill_context() {
        let f = fixture(0);
        f.workflows
            .save(&workflow(
                "w1",
                serde_json::json!([
                    { "id": "analyze", "type": "ai_analysis", "config": {} },
                    { "id": "notify", "type": "notification",
                      "config": { "channel": "oncall", "message": "done" } },
                ]),
            ))
            .await
            .unwrap();

        let started = f.engine.start_workflow("w1", HashMap::new()).await.unwrap();
        assert_eq!(started.status, ExecutionStatus::Pending);

        let finished = wait_terminal(&f, &started.id).await;
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(finished.step_executions.len(), 2);
        assert_eq!(finished.step_executions[0].step_id, "analyze");
        assert_eq!(finished.step_executions[1].step_id, "notify");
        assert_eq!(
            finished.context.get("step_analyze_root_cause"),
            Some(&serde_json::json!("OOM"))
        );
        assert_eq!(
            finished.context.get("step_notify_status"),
            Some(&serde_json::json!("sent"))
        );
    }

    #[tokio::test]
    async fn test_condition_skips_step_without_history() {
        let f = fixture(0);
        f.workflows
            .save(&workflow(
                "w1",
                serde_json::json!([
                    { "id": "gated", "type": "notification",
                      "config": { "channel": "oncall", "message": "never" },
                      "conditions": [
                          { "field": "absent", "operator": "eq", "value": "x" }
                      ] },
                    { "id": "always", "type": "notification",
                      "config": { "channel": "oncall", "message": "yes" } },
                ]),
            ))
            .await
            .unwrap();

        let started = f.engine.start_workflow("w1", HashMap::new()).await.unwrap();
        let finished = wait_terminal(&f, &started.id).await;

        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(finished.step_executions.len(), 1);
        assert_eq!(finished.step_executions[0].step_id, "always");
        assert!(!finished.context.keys().any(|k| k.starts_with("step_gated")));
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let f = fixture(1);
        f.workflows
            .save(&workflow(
                "w1",
                serde_json::json!([
                    { "id": "analyze", "type": "ai_analysis", "config": {},
                      "retry_policy": {
                          "max_retries": 2,
                          "initial_delay": "100ms",
                          "max_delay": "1s",
                          "backoff_factor": 2.0
                      } },
                ]),
            ))
            .await
            .unwrap();

        let started_at = tokio::time::Instant::now();
        let started = f.engine.start_workflow("w1", HashMap::new()).await.unwrap();
        let finished = wait_terminal(&f, &started.id).await;

        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(finished.step_executions[0].retry_count, 1);
        // One backoff sleep of >= 100ms happened between the attempts.
        assert!(started_at.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_no_retry_policy_fails_immediately() {
        let f = fixture(u32::MAX);
        f.workflows
            .save(&workflow(
                "w1",
                serde_json::json!([
                    { "id": "analyze", "type": "ai_analysis", "config": {} },
                ]),
            ))
            .await
            .unwrap();

        let started = f.engine.start_workflow("w1", HashMap::new()).await.unwrap();
        let finished = wait_terminal(&f, &started.id).await;

        assert_eq!(finished.status, ExecutionStatus::Failed);
        assert_eq!(finished.step_executions[0].status, ExecutionStatus::Failed);
        assert_eq!(finished.step_executions[0].retry_count, 0);
        assert!(finished.error.contains("analyze"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_execution() {
        let f = fixture(u32::MAX);
        f.workflows
            .save(&workflow(
                "w1",
                serde_json::json!([
                    { "id": "analyze", "type": "ai_analysis", "config": {},
                      "retry_policy": {
                          "max_retries": 2,
                          "initial_delay": "10ms",
                          "max_delay": "20ms",
                          "backoff_factor": 2.0
                      } },
                ]),
            ))
            .await
            .unwrap();

        let started = f.engine.start_workflow("w1", HashMap::new()).await.unwrap();
        let finished = wait_terminal(&f, &started.id).await;

        assert_eq!(finished.status, ExecutionStatus::Failed);
        assert_eq!(finished.step_executions[0].retry_count, 2);
    }

    #[tokio::test]
    async fn test_declared_failure_branch_still_fails() {
        let f = fixture(u32::MAX);
        f.workflows
            .save(&workflow(
                "w1",
                serde_json::json!([
                    { "id": "analyze", "type": "ai_analysis", "config": {},
                      "on_failure": ["cleanup"] },
                    { "id": "cleanup", "type": "notification",
                      "config": { "channel": "oncall", "message": "cleanup" } },
                ]),
            ))
            .await
            .unwrap();

        let started = f.engine.start_workflow("w1", HashMap::new()).await.unwrap();
        let finished = wait_terminal(&f, &started.id).await;
        assert_eq!(finished.status, ExecutionStatus::Failed);
        // v1 does not jump to the failure branch.
        assert_eq!(finished.step_executions.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_wait_step() {
        let f = fixture(0);
        f.workflows
            .save(&workflow(
                "w1",
                serde_json::json!([
                    { "id": "pause", "type": "wait", "config": { "duration": "10s" } },
                ]),
            ))
            .await
            .unwrap();

        let started = f.engine.start_workflow("w1", HashMap::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.engine.cancel_execution(&started.id).await.unwrap();

        let finished = wait_terminal(&f, &started.id).await;
        assert_eq!(finished.status, ExecutionStatus::Cancelled);

        // Owner task exits without overwriting the cancelled status.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after = f
            .executions
            .find_by_id(&started.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, ExecutionStatus::Cancelled);
        assert_eq!(f.engine.statistics()["active_executions"], 0);
    }

    #[tokio::test]
    async fn test_decision_reads_prior_step_output() {
        let f = fixture(0);
        f.workflows
            .save(&workflow(
                "w1",
                serde_json::json!([
                    { "id": "analysis", "type": "ai_analysis", "config": {} },
                    { "id": "route", "type": "decision",
                      "config": { "conditions": [
                          { "if": "step_analysis.root_cause == 'OOM'", "then": "scale_up" },
                          { "if": "step_analysis.root_cause == 'Config'", "then": "patch" },
                      ] } },
                ]),
            ))
            .await
            .unwrap();

        let started = f.engine.start_workflow("w1", HashMap::new()).await.unwrap();
        let finished = wait_terminal(&f, &started.id).await;

        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(
            finished.context.get("step_route_decision"),
            Some(&serde_json::json!("scale_up"))
        );
    }
}
