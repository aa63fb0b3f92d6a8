// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL agent repository.
//!
//! Backed by the `agents` table; composite fields (metadata, capabilities,
//! connection info) live in jsonb columns. Indexed by
//! `(cluster_id, status, last_heartbeat)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::agent::{Agent, AgentStatus};
use crate::domain::repository::{AgentRepository, RepositoryError};

pub struct PostgresAgentRepository {
    pool: PgPool,
}

impl PostgresAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_agent(row: &sqlx::postgres::PgRow) -> Result<Agent, RepositoryError> {
    let status_str: String = row.get("status");
    let metadata: serde_json::Value = row.get("metadata");
    let capabilities: serde_json::Value = row.get("capabilities");
    let connection_info: Option<serde_json::Value> = row.get("connection_info");

    Ok(Agent {
        id: row.get("id"),
        cluster_id: row.get("cluster_id"),
        cluster_name: row.get("cluster_name"),
        version: row.get("version"),
        status: AgentStatus::parse(&status_str).unwrap_or(AgentStatus::Error),
        last_heartbeat: row.get("last_heartbeat"),
        registered_at: row.get("registered_at"),
        updated_at: row.get("updated_at"),
        metadata: serde_json::from_value(metadata)?,
        capabilities: serde_json::from_value(capabilities)?,
        connection_info: connection_info.map(serde_json::from_value).transpose()?,
    })
}

#[async_trait]
impl AgentRepository for PostgresAgentRepository {
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_value(&agent.metadata)?;
        let capabilities = serde_json::to_value(&agent.capabilities)?;
        let connection_info = agent
            .connection_info
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO agents (
                id, cluster_id, cluster_name, version, status,
                last_heartbeat, registered_at, updated_at,
                metadata, capabilities, connection_info
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                cluster_id = EXCLUDED.cluster_id,
                cluster_name = EXCLUDED.cluster_name,
                version = EXCLUDED.version,
                status = EXCLUDED.status,
                last_heartbeat = EXCLUDED.last_heartbeat,
                updated_at = EXCLUDED.updated_at,
                metadata = EXCLUDED.metadata,
                capabilities = EXCLUDED.capabilities,
                connection_info = EXCLUDED.connection_info
            "#,
        )
        .bind(&agent.id)
        .bind(&agent.cluster_id)
        .bind(&agent.cluster_name)
        .bind(&agent.version)
        .bind(agent.status.as_str())
        .bind(agent.last_heartbeat)
        .bind(agent.registered_at)
        .bind(agent.updated_at)
        .bind(metadata)
        .bind(capabilities)
        .bind(connection_info)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, cluster_id, cluster_name, version, status,
                   last_heartbeat, registered_at, updated_at,
                   metadata, capabilities, connection_info
            FROM agents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_agent).transpose()
    }

    async fn find_by_cluster_id(&self, cluster_id: &str) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, cluster_id, cluster_name, version, status,
                   last_heartbeat, registered_at, updated_at,
                   metadata, capabilities, connection_info
            FROM agents
            WHERE cluster_id = $1
            ORDER BY registered_at DESC
            LIMIT 1
            "#,
        )
        .bind(cluster_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_agent).transpose()
    }

    async fn list(&self, status: Option<AgentStatus>) -> Result<Vec<Agent>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT id, cluster_id, cluster_name, version, status,
                           last_heartbeat, registered_at, updated_at,
                           metadata, capabilities, connection_info
                    FROM agents
                    WHERE status = $1
                    ORDER BY registered_at DESC
                    "#,
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, cluster_id, cluster_name, version, status,
                           last_heartbeat, registered_at, updated_at,
                           metadata, capabilities, connection_info
                    FROM agents
                    ORDER BY registered_at DESC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_agent).collect()
    }

    async fn update_status(&self, id: &str, status: AgentStatus) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE agents SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE agents SET last_heartbeat = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
