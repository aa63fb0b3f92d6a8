// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL command & result repository.
//!
//! Commands indexed by `(cluster_id, status, correlation_id)`. A command has
//! at most one result; `command_results.command_id` is unique and a second
//! insert is a no-op.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::time::Duration;

use crate::domain::command::{Command, CommandResult, CommandStatus};
use crate::domain::repository::{CommandRepository, RepositoryError};

pub struct PostgresCommandRepository {
    pool: PgPool,
}

impl PostgresCommandRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_command(row: &sqlx::postgres::PgRow) -> Result<Command, RepositoryError> {
    let status: String = row.get("status");
    let args: serde_json::Value = row.get("args");
    let metadata: serde_json::Value = row.get("metadata");
    let timeout_ms: i64 = row.get("timeout_ms");

    Ok(Command {
        id: row.get("id"),
        cluster_id: row.get("cluster_id"),
        r#type: row.get("type"),
        tool: row.get("tool"),
        action: row.get("action"),
        args: serde_json::from_value(args)?,
        namespace: row.get("namespace"),
        timeout: Duration::from_millis(timeout_ms.max(0) as u64),
        issued_by: row.get("issued_by"),
        correlation_id: row.get("correlation_id"),
        status: CommandStatus::parse(&status).unwrap_or(CommandStatus::Failed),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        metadata: serde_json::from_value(metadata)?,
    })
}

fn row_to_result(row: &sqlx::postgres::PgRow) -> CommandResult {
    let execution_time_ms: i64 = row.get("execution_time_ms");
    CommandResult {
        id: row.get("id"),
        command_id: row.get("command_id"),
        cluster_id: row.get("cluster_id"),
        status: row.get("status"),
        exit_code: row.get("exit_code"),
        output: row.get("output"),
        error: row.get("error"),
        execution_time: Duration::from_millis(execution_time_ms.max(0) as u64),
        timestamp: row.get("timestamp"),
    }
}

#[async_trait]
impl CommandRepository for PostgresCommandRepository {
    async fn insert(&self, command: &Command) -> Result<(), RepositoryError> {
        let args = serde_json::to_value(&command.args)?;
        let metadata = serde_json::to_value(&command.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO commands (
                id, cluster_id, type, tool, action, args, namespace,
                timeout_ms, issued_by, correlation_id, status,
                created_at, updated_at, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&command.id)
        .bind(&command.cluster_id)
        .bind(&command.r#type)
        .bind(&command.tool)
        .bind(&command.action)
        .bind(args)
        .bind(&command.namespace)
        .bind(command.timeout.as_millis() as i64)
        .bind(&command.issued_by)
        .bind(&command.correlation_id)
        .bind(command.status.as_str())
        .bind(command.created_at)
        .bind(command.updated_at)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Command>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM commands WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_command).transpose()
    }

    async fn update_status(&self, id: &str, status: CommandStatus) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE commands SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_result(&self, result: &CommandResult) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO command_results (
                id, command_id, cluster_id, status, exit_code,
                output, error, execution_time_ms, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (command_id) DO NOTHING
            "#,
        )
        .bind(&result.id)
        .bind(&result.command_id)
        .bind(&result.cluster_id)
        .bind(&result.status)
        .bind(result.exit_code)
        .bind(&result.output)
        .bind(&result.error)
        .bind(result.execution_time.as_millis() as i64)
        .bind(result.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_result(
        &self,
        command_id: &str,
    ) -> Result<Option<CommandResult>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM command_results WHERE command_id = $1")
            .bind(command_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_result))
    }
}
