// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL workflow & execution repositories.
//!
//! Step lists, trigger payloads, contexts and step histories are stored as
//! jsonb documents. Executions are indexed by `(workflow_id, status)`.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::time::Duration;

use crate::domain::repository::{ExecutionRepository, RepositoryError, WorkflowRepository};
use crate::domain::workflow::{
    ExecutionStatus, TriggerType, Workflow, WorkflowExecution, WorkflowStatus,
};

pub struct PostgresWorkflowRepository {
    pool: PgPool,
}

impl PostgresWorkflowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_workflow(row: &sqlx::postgres::PgRow) -> Result<Workflow, RepositoryError> {
    let status: String = row.get("status");
    let trigger_type: String = row.get("trigger_type");
    let trigger_config: serde_json::Value = row.get("trigger_config");
    let steps: serde_json::Value = row.get("steps");
    let metadata: serde_json::Value = row.get("metadata");
    let timeout_ms: Option<i64> = row.get("timeout_ms");

    Ok(Workflow {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        trigger_type: serde_json::from_value(serde_json::Value::String(trigger_type))
            .unwrap_or(TriggerType::Manual),
        trigger_config: serde_json::from_value(trigger_config)?,
        steps: serde_json::from_value(steps)?,
        status: serde_json::from_value(serde_json::Value::String(status))
            .unwrap_or(WorkflowStatus::Draft),
        priority: row.get("priority"),
        timeout: timeout_ms.map(|ms| Duration::from_millis(ms.max(0) as u64)),
        metadata: serde_json::from_value(metadata)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl WorkflowRepository for PostgresWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let trigger_config = serde_json::to_value(&workflow.trigger_config)?;
        let steps = serde_json::to_value(&workflow.steps)?;
        let metadata = serde_json::to_value(&workflow.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (
                id, name, description, trigger_type, trigger_config,
                steps, status, priority, timeout_ms, metadata,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                trigger_type = EXCLUDED.trigger_type,
                trigger_config = EXCLUDED.trigger_config,
                steps = EXCLUDED.steps,
                status = EXCLUDED.status,
                priority = EXCLUDED.priority,
                timeout_ms = EXCLUDED.timeout_ms,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(match workflow.trigger_type {
            TriggerType::Event => "event",
            TriggerType::Schedule => "schedule",
            TriggerType::Manual => "manual",
        })
        .bind(trigger_config)
        .bind(steps)
        .bind(workflow.status.as_str())
        .bind(workflow.priority)
        .bind(workflow.timeout.map(|t| t.as_millis() as i64))
        .bind(metadata)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_workflow).transpose()
    }
}

pub struct PostgresExecutionRepository {
    pool: PgPool,
}

impl PostgresExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_execution(row: &sqlx::postgres::PgRow) -> Result<WorkflowExecution, RepositoryError> {
    let status: String = row.get("status");
    let trigger_event: serde_json::Value = row.get("trigger_event");
    let step_executions: serde_json::Value = row.get("step_executions");
    let context: serde_json::Value = row.get("context");
    let duration_ms: i64 = row.get("duration_ms");

    Ok(WorkflowExecution {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        trigger_event: serde_json::from_value(trigger_event)?,
        status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Failed),
        current_step_id: row.get("current_step_id"),
        step_executions: serde_json::from_value(step_executions)?,
        context: serde_json::from_value(context)?,
        error: row.get("error"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        duration: Duration::from_millis(duration_ms.max(0) as u64),
    })
}

#[async_trait]
impl ExecutionRepository for PostgresExecutionRepository {
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let trigger_event = serde_json::to_value(&execution.trigger_event)?;
        let step_executions = serde_json::to_value(&execution.step_executions)?;
        let context = serde_json::to_value(&execution.context)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_executions (
                id, workflow_id, trigger_event, status, current_step_id,
                step_executions, context, error,
                started_at, completed_at, duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                current_step_id = EXCLUDED.current_step_id,
                step_executions = EXCLUDED.step_executions,
                context = EXCLUDED.context,
                error = EXCLUDED.error,
                completed_at = EXCLUDED.completed_at,
                duration_ms = EXCLUDED.duration_ms
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.workflow_id)
        .bind(trigger_event)
        .bind(execution.status.as_str())
        .bind(&execution.current_step_id)
        .bind(step_executions)
        .bind(context)
        .bind(&execution.error)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration.as_millis() as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_execution).transpose()
    }
}
