// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL cluster repository.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::cluster::{Cluster, ClusterHealth, ClusterStatus};
use crate::domain::repository::{ClusterRepository, RepositoryError};

pub struct PostgresClusterRepository {
    pool: PgPool,
}

impl PostgresClusterRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_cluster(row: &sqlx::postgres::PgRow) -> Result<Cluster, RepositoryError> {
    let status: String = row.get("status");
    let health: String = row.get("health");
    let metadata: serde_json::Value = row.get("metadata");

    Ok(Cluster {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        environment: row.get("environment"),
        region: row.get("region"),
        provider: row.get("provider"),
        status: serde_json::from_value(serde_json::Value::String(status))
            .unwrap_or(ClusterStatus::Error),
        health: serde_json::from_value(serde_json::Value::String(health))
            .unwrap_or(ClusterHealth::Unknown),
        version: row.get("version"),
        agent_count: row.get("agent_count"),
        node_count: row.get("node_count"),
        pod_count: row.get("pod_count"),
        metadata: serde_json::from_value(metadata)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl ClusterRepository for PostgresClusterRepository {
    async fn save(&self, cluster: &Cluster) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_value(&cluster.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO clusters (
                id, name, description, environment, region, provider,
                status, health, version, agent_count, node_count, pod_count,
                metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                environment = EXCLUDED.environment,
                region = EXCLUDED.region,
                provider = EXCLUDED.provider,
                status = EXCLUDED.status,
                health = EXCLUDED.health,
                version = EXCLUDED.version,
                agent_count = EXCLUDED.agent_count,
                node_count = EXCLUDED.node_count,
                pod_count = EXCLUDED.pod_count,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&cluster.id)
        .bind(&cluster.name)
        .bind(&cluster.description)
        .bind(&cluster.environment)
        .bind(&cluster.region)
        .bind(&cluster.provider)
        .bind(cluster.status.as_str())
        .bind(cluster.health.as_str())
        .bind(&cluster.version)
        .bind(cluster.agent_count)
        .bind(cluster.node_count)
        .bind(cluster.pod_count)
        .bind(metadata)
        .bind(cluster.created_at)
        .bind(cluster.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Cluster>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM clusters WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_cluster).transpose()
    }

    async fn list(&self) -> Result<Vec<Cluster>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM clusters ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_cluster).collect()
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM clusters WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
