// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Domain Model
//!
//! One collector agent per managed cluster. The registry owns the lifecycle:
//! `new → online ⇄ offline → deleted`. Re-registration from offline is
//! allowed and returns the agent to online while preserving its identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A registered collector agent.
///
/// # Invariants
/// - Exactly one live registration per `cluster_id`; re-registration updates
///   the existing record, never duplicates it.
/// - `status == Online` implies the last heartbeat is within the heartbeat
///   timeout at sweep time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub cluster_id: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "AgentStatus::registering")]
    pub status: AgentStatus,
    #[serde(default = "Utc::now")]
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub registered_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub connection_info: Option<ConnectionInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
    Registering,
    Error,
}

impl AgentStatus {
    fn registering() -> Self {
        Self::Registering
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Registering => "registering",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "registering" => Some(Self::Registering),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection details reported by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reconnect_count: u32,
}

impl Agent {
    /// Mark the agent online and stamp the heartbeat.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat = now;
        self.status = AgentStatus::Online;
        if let Some(info) = self.connection_info.as_mut() {
            info.last_seen = Some(now);
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == AgentStatus::Online
    }
}

/// Heartbeat payload published on `aetherius.agent.<cluster_id>.heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: String,
    pub cluster_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}
