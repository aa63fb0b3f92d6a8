// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Command Domain Model
//!
//! A `Command` is a read-only diagnostic action dispatched to an agent.
//!
//! Status is monotonic on the success path `pending → sent → (executing) →
//! completed`; any path may terminate at `failed` or `timeout`. Once a
//! command is terminal its timeout timer is canceled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Maximum result output retained, in bytes. Longer output is truncated and
/// marked.
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Marker appended to truncated command output.
pub const TRUNCATION_MARKER: &str = "\n... (output truncated)";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub id: String,
    pub cluster_id: String,
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub issued_by: String,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub status: CommandStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    #[default]
    Pending,
    Sent,
    Executing,
    Completed,
    Failed,
    Timeout,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "executing" => Some(Self::Executing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one command. At most one result per command; its
/// arrival cancels the command timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(default)]
    pub id: String,
    pub command_id: String,
    #[serde(default)]
    pub cluster_id: String,
    /// Agent-reported status string; "success" maps to `completed`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    #[serde(default, with = "humantime_serde")]
    pub execution_time: Duration,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl CommandResult {
    /// Cap `output` at [`MAX_OUTPUT_BYTES`], appending [`TRUNCATION_MARKER`]
    /// when anything was cut. The cut lands on a UTF-8 boundary.
    pub fn truncate_output(&mut self) {
        if self.output.len() <= MAX_OUTPUT_BYTES {
            return;
        }
        let mut end = MAX_OUTPUT_BYTES;
        while end > 0 && !self.output.is_char_boundary(end) {
            end -= 1;
        }
        self.output.truncate(end);
        self.output.push_str(TRUNCATION_MARKER);
    }
}
