// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Strategy Domain Model
//!
//! A `Strategy` binds a symptom pattern to a workflow. The matcher scores
//! internal events against each enabled strategy's symptoms and launches the
//! best-scoring workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::event::InternalEvent;

/// Score contributed by each matching symptom.
pub const SYMPTOM_MATCH_SCORE: i32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    /// pod_failure, node_issue, network, ...
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub symptoms: Vec<Symptom>,
    pub workflow_id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    /// 10 points per matching symptom.
    pub fn match_score(&self, event: &InternalEvent) -> i32 {
        self.symptoms
            .iter()
            .filter(|symptom| symptom.matches(event))
            .count() as i32
            * SYMPTOM_MATCH_SCORE
    }
}

/// A failure symptom pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symptom {
    /// event, metric, log (only "event" is matched today)
    pub r#type: String,
    pub pattern: String,
    #[serde(default)]
    pub conditions: HashMap<String, serde_json::Value>,
}

impl Symptom {
    /// An "event" symptom matches iff the embedded event's reason equals the
    /// pattern. Other symptom types are reserved.
    pub fn matches(&self, event: &InternalEvent) -> bool {
        if self.r#type != "event" {
            return false;
        }
        event
            .payload
            .get("event")
            .and_then(|e| e.get("reason"))
            .and_then(|r| r.as_str())
            .map(|reason| reason == self.pattern)
            .unwrap_or(false)
    }
}
