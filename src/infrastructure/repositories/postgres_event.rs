// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL event repository.
//!
//! Events are insert-only. Indexed by
//! `(cluster_id, severity, namespace, timestamp)`.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::event::{Event, EventSeverity};
use crate::domain::repository::{EventQuery, EventRepository, RepositoryError};

pub struct PostgresEventRepository {
    pool: PgPool,
}

impl PostgresEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<Event, RepositoryError> {
    let severity: String = row.get("severity");
    let labels: serde_json::Value = row.get("labels");
    let raw_data: serde_json::Value = row.get("raw_data");

    Ok(Event {
        id: row.get("id"),
        cluster_id: row.get("cluster_id"),
        timestamp: row.get("timestamp"),
        r#type: row.get("type"),
        source: row.get("source"),
        severity: serde_json::from_value(serde_json::Value::String(severity))
            .unwrap_or(EventSeverity::Unknown),
        reason: row.get("reason"),
        message: row.get("message"),
        namespace: row.get("namespace"),
        labels: serde_json::from_value(labels)?,
        raw_data: serde_json::from_value(raw_data)?,
        processed_at: row.get("processed_at"),
    })
}

#[async_trait]
impl EventRepository for PostgresEventRepository {
    async fn insert(&self, event: &Event) -> Result<(), RepositoryError> {
        let labels = serde_json::to_value(&event.labels)?;
        let raw_data = serde_json::to_value(&event.raw_data)?;

        sqlx::query(
            r#"
            INSERT INTO events (
                id, cluster_id, timestamp, type, source, severity,
                reason, message, namespace, labels, raw_data, processed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&event.id)
        .bind(&event.cluster_id)
        .bind(event.timestamp)
        .bind(&event.r#type)
        .bind(&event.source)
        .bind(event.severity.as_str())
        .bind(&event.reason)
        .bind(&event.message)
        .bind(&event.namespace)
        .bind(labels)
        .bind(raw_data)
        .bind(event.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Event>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn search(&self, query: &EventQuery) -> Result<Vec<Event>, RepositoryError> {
        let limit = if query.limit > 0 { query.limit } else { 100 };

        let rows = sqlx::query(
            r#"
            SELECT *
            FROM events
            WHERE ($1::text IS NULL OR cluster_id = $1)
              AND ($2::text IS NULL OR severity = $2)
              AND ($3::text IS NULL OR namespace = $3)
              AND ($4::timestamptz IS NULL OR timestamp >= $4)
              AND ($5::timestamptz IS NULL OR timestamp <= $5)
            ORDER BY timestamp DESC
            LIMIT $6
            "#,
        )
        .bind(&query.cluster_id)
        .bind(&query.severity)
        .bind(&query.namespace)
        .bind(query.start_time)
        .bind(query.end_time)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }
}
