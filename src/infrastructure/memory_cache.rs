// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process cache adapter.
//!
//! TTL semantics match the Redis adapter closely enough for the test suite:
//! entries expire lazily on read, set-if-absent locks honor their TTL.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::domain::agent::Agent;
use crate::domain::repository::{CacheError, CacheStore};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, key: String, value: String, ttl: Option<Duration>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            Entry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Set-if-absent with TTL. Returns true iff the key was newly created.
    fn set_nx(&self, key: String, value: String, ttl: Duration) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&key) {
            Some(entry) if !entry.expired() => false,
            _ => {
                entries.insert(
                    key,
                    Entry {
                        value,
                        expires_at: Some(Instant::now() + ttl),
                    },
                );
                true
            }
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn cache_agent(&self, agent: &Agent, ttl: Duration) -> Result<(), CacheError> {
        let data =
            serde_json::to_string(agent).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set(format!("agent:{}", agent.id), data, Some(ttl));
        Ok(())
    }

    async fn get_cached_agent(&self, id: &str) -> Result<Option<Agent>, CacheError> {
        match self.get(&format!("agent:{id}")) {
            Some(data) => serde_json::from_str(&data)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn delete_cached_agent(&self, id: &str) -> Result<(), CacheError> {
        self.remove(&format!("agent:{id}"));
        Ok(())
    }

    async fn set_agent_online(&self, id: &str, ttl: Duration) -> Result<(), CacheError> {
        self.set(format!("agent:status:{id}"), "online".into(), Some(ttl));
        Ok(())
    }

    async fn is_agent_online(&self, id: &str) -> Result<bool, CacheError> {
        Ok(self.get(&format!("agent:status:{id}")).is_some())
    }

    async fn increment_event_counter(
        &self,
        cluster_id: &str,
        severity: &str,
    ) -> Result<i64, CacheError> {
        let key = format!("event:count:{cluster_id}:{severity}");
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let next = entries
            .get(&key)
            .and_then(|entry| entry.value.parse::<i64>().ok())
            .unwrap_or(0)
            + 1;
        entries.insert(
            key,
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn get_event_count(&self, cluster_id: &str, severity: &str) -> Result<i64, CacheError> {
        Ok(self
            .get(&format!("event:count:{cluster_id}:{severity}"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        Ok(self.set_nx(format!("lock:{key}"), "locked".into(), ttl))
    }

    async fn release_lock(&self, key: &str) -> Result<(), CacheError> {
        self.remove(&format!("lock:{key}"));
        Ok(())
    }

    async fn health(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
