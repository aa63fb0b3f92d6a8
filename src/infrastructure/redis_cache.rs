// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Redis cache adapter.
//!
//! Key namespace:
//! ```text
//! agent:<id>                        agent JSON            TTL 30m
//! agent:status:<id>                 "online" presence     TTL 2m
//! event:count:<cluster>:<severity>  integer counter       no TTL
//! lock:<key>                        "locked" (SET NX EX)  TTL per caller
//! ```
//! `session:*`, `ratelimit:*` and `command:queue:*` keys in the same
//! database belong to the REST auth layer and the agent pull path.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

use crate::domain::agent::Agent;
use crate::domain::repository::{CacheError, CacheStore};
use crate::infrastructure::config::RedisSettings;

pub struct RedisCache {
    connection: ConnectionManager,
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

impl RedisCache {
    pub async fn connect(settings: &RedisSettings) -> Result<Self, CacheError> {
        let url = if settings.password.is_empty() {
            format!("redis://{}/{}", settings.addr, settings.db)
        } else {
            format!("redis://:{}@{}/{}", settings.password, settings.addr, settings.db)
        };
        let client = redis::Client::open(url).map_err(CacheError::from)?;
        let mut connection = client
            .get_connection_manager()
            .await
            .map_err(CacheError::from)?;

        let _: () = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(CacheError::from)?;

        info!(addr = %settings.addr, "redis cache initialized");
        Ok(Self { connection })
    }

    fn agent_key(id: &str) -> String {
        format!("agent:{id}")
    }

    fn status_key(id: &str) -> String {
        format!("agent:status:{id}")
    }

    fn counter_key(cluster_id: &str, severity: &str) -> String {
        format!("event:count:{cluster_id}:{severity}")
    }

    fn lock_key(key: &str) -> String {
        format!("lock:{key}")
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn cache_agent(&self, agent: &Agent, ttl: Duration) -> Result<(), CacheError> {
        let data =
            serde_json::to_string(agent).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let mut con = self.connection.clone();
        con.set_ex::<_, _, ()>(Self::agent_key(&agent.id), data, Self::ttl_secs(ttl))
            .await?;
        Ok(())
    }

    async fn get_cached_agent(&self, id: &str) -> Result<Option<Agent>, CacheError> {
        let mut con = self.connection.clone();
        let data: Option<String> = con.get(Self::agent_key(id)).await?;
        match data {
            Some(data) => serde_json::from_str(&data)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn delete_cached_agent(&self, id: &str) -> Result<(), CacheError> {
        let mut con = self.connection.clone();
        con.del::<_, ()>(Self::agent_key(id)).await?;
        Ok(())
    }

    async fn set_agent_online(&self, id: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut con = self.connection.clone();
        con.set_ex::<_, _, ()>(Self::status_key(id), "online", Self::ttl_secs(ttl))
            .await?;
        Ok(())
    }

    async fn is_agent_online(&self, id: &str) -> Result<bool, CacheError> {
        let mut con = self.connection.clone();
        let exists: bool = con.exists(Self::status_key(id)).await?;
        Ok(exists)
    }

    async fn increment_event_counter(
        &self,
        cluster_id: &str,
        severity: &str,
    ) -> Result<i64, CacheError> {
        let mut con = self.connection.clone();
        let count: i64 = con.incr(Self::counter_key(cluster_id, severity), 1).await?;
        Ok(count)
    }

    async fn get_event_count(&self, cluster_id: &str, severity: &str) -> Result<i64, CacheError> {
        let mut con = self.connection.clone();
        let count: Option<i64> = con.get(Self::counter_key(cluster_id, severity)).await?;
        Ok(count.unwrap_or(0))
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut con = self.connection.clone();
        // SET NX EX: the reply is OK when the key was newly created, nil
        // when it already existed.
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::lock_key(key))
            .arg("locked")
            .arg("NX")
            .arg("EX")
            .arg(Self::ttl_secs(ttl))
            .query_async(&mut con)
            .await?;
        Ok(reply.is_some())
    }

    async fn release_lock(&self, key: &str) -> Result<(), CacheError> {
        let mut con = self.connection.clone();
        con.del::<_, ()>(Self::lock_key(key)).await?;
        Ok(())
    }

    async fn health(&self) -> Result<(), CacheError> {
        let mut con = self.connection.clone();
        let _: () = redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }
}
