// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Event Domain Model
//!
//! An `Event` is one observation surfaced by an agent. Events are immutable
//! once persisted; `(cluster_id, reason, labels["name"])` identifies a
//! deduplication window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kubernetes reasons that classify an event as critical regardless of its
/// reported severity.
pub const CRITICAL_REASONS: [&str; 7] = [
    "CrashLoopBackOff",
    "OOMKilling",
    "FailedScheduling",
    "NodeNotReady",
    "VolumeBindingFailed",
    "ImagePullBackOff",
    "DeadlineExceeded",
];

/// One observation from an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub cluster_id: String,
    /// Agent clock.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub severity: EventSeverity,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub raw_data: HashMap<String, serde_json::Value>,
    /// Control-plane clock, set when the pipeline accepts the event.
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Name label used for deduplication and aggregation grouping.
    pub fn name_label(&self) -> &str {
        self.labels.get("name").map(String::as_str).unwrap_or("")
    }

    /// An event is critical if its severity says so or its reason is in the
    /// well-known critical set.
    pub fn is_critical(&self) -> bool {
        self.severity == EventSeverity::Critical
            || CRITICAL_REASONS.contains(&self.reason.as_str())
    }
}

/// Event severity. Severities outside the known set deserialize to `Unknown`
/// and rank 0, so the severity filter always drops them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Low,
    Medium,
    High,
    Critical,
    #[default]
    #[serde(other)]
    Unknown,
}

impl EventSeverity {
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
            Self::Unknown => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified event republished on `internal.event.<type>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalEvent {
    pub r#type: InternalEventType,
    pub cluster_id: String,
    pub severity: String,
    pub payload: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl InternalEvent {
    /// Wrap a critical event for the internal bus.
    pub fn critical(event: &Event) -> Self {
        let mut payload = HashMap::new();
        payload.insert("event_id".into(), serde_json::json!(event.id));
        payload.insert("reason".into(), serde_json::json!(event.reason));
        payload.insert("message".into(), serde_json::json!(event.message));
        payload.insert("namespace".into(), serde_json::json!(event.namespace));
        payload.insert("labels".into(), serde_json::json!(event.labels));
        payload.insert("event".into(), serde_json::json!(event));
        Self {
            r#type: InternalEventType::Critical,
            cluster_id: event.cluster_id.clone(),
            severity: "critical".into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn subject(&self) -> String {
        format!("internal.event.{}", self.r#type.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalEventType {
    Critical,
    Anomaly,
    SloBreach,
    CommandResult,
    MetricsAlert,
}

impl InternalEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Anomaly => "anomaly",
            Self::SloBreach => "slo_breach",
            Self::CommandResult => "command_result",
            Self::MetricsAlert => "metrics_alert",
        }
    }
}
