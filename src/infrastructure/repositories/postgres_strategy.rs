// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL strategy repository.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::repository::{RepositoryError, StrategyRepository};
use crate::domain::strategy::Strategy;

pub struct PostgresStrategyRepository {
    pool: PgPool,
}

impl PostgresStrategyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_strategy(row: &sqlx::postgres::PgRow) -> Result<Strategy, RepositoryError> {
    let symptoms: serde_json::Value = row.get("symptoms");
    let metadata: serde_json::Value = row.get("metadata");

    Ok(Strategy {
        id: row.get("id"),
        name: row.get("name"),
        category: row.get("category"),
        description: row.get("description"),
        symptoms: serde_json::from_value(symptoms)?,
        workflow_id: row.get("workflow_id"),
        priority: row.get("priority"),
        enabled: row.get("enabled"),
        metadata: serde_json::from_value(metadata)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl StrategyRepository for PostgresStrategyRepository {
    async fn save(&self, strategy: &Strategy) -> Result<(), RepositoryError> {
        let symptoms = serde_json::to_value(&strategy.symptoms)?;
        let metadata = serde_json::to_value(&strategy.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO strategies (
                id, name, category, description, symptoms,
                workflow_id, priority, enabled, metadata,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                category = EXCLUDED.category,
                description = EXCLUDED.description,
                symptoms = EXCLUDED.symptoms,
                workflow_id = EXCLUDED.workflow_id,
                priority = EXCLUDED.priority,
                enabled = EXCLUDED.enabled,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&strategy.id)
        .bind(&strategy.name)
        .bind(&strategy.category)
        .bind(&strategy.description)
        .bind(symptoms)
        .bind(&strategy.workflow_id)
        .bind(strategy.priority)
        .bind(strategy.enabled)
        .bind(metadata)
        .bind(strategy.created_at)
        .bind(strategy.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, enabled_only: bool) -> Result<Vec<Strategy>, RepositoryError> {
        let rows = if enabled_only {
            sqlx::query("SELECT * FROM strategies WHERE enabled ORDER BY priority DESC")
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT * FROM strategies ORDER BY priority DESC")
                .fetch_all(&self.pool)
                .await?
        };
        rows.iter().map(row_to_strategy).collect()
    }
}
