// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Message Bus Port
//!
//! Subject-addressed pub/sub with NATS semantics: `*` matches one token,
//! `>` matches the rest. Delivery is at-most-once; messages published while
//! disconnected are lost and callers must treat the publish as failed.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod memory;
pub mod nats;
pub mod router;
pub mod subscriber;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus disconnected")]
    Disconnected,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("request timed out")]
    RequestTimeout,
}

/// One delivered message. `reply` carries the requester's inbox subject when
/// a response is expected.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    pub reply: Option<String>,
}

/// Receiving side of one subscription.
pub struct BusSubscription {
    receiver: mpsc::Receiver<BusMessage>,
}

impl BusSubscription {
    pub fn new(receiver: mpsc::Receiver<BusMessage>) -> Self {
        Self { receiver }
    }

    /// Next message, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Publish and await a single reply on an inbox subject.
    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<BusMessage, BusError>;

    async fn subscribe(&self, subject: &str) -> Result<BusSubscription, BusError>;

    fn is_connected(&self) -> bool;
}

/// Subject conventions shared by the control plane and agents.
pub mod subjects {
    pub const REGISTER: &str = "aetherius.agent.*.register";
    pub const HEARTBEAT: &str = "aetherius.agent.*.heartbeat";
    pub const EVENT: &str = "aetherius.agent.*.event";
    pub const METRICS: &str = "aetherius.agent.*.metrics";
    pub const RESULT: &str = "aetherius.agent.*.result";

    pub const INTERNAL_CRITICAL: &str = "internal.event.critical";
    pub const INTERNAL_ANOMALY: &str = "internal.event.anomaly";

    pub fn command(cluster_id: &str) -> String {
        format!("aetherius.agent.{cluster_id}.command")
    }

    /// Cluster id is the third token of every agent subject.
    pub fn cluster_id(subject: &str) -> Option<&str> {
        subject.split('.').nth(2)
    }
}

/// NATS-style subject matching: `*` matches exactly one token, `>` matches
/// one or more trailing tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (None, None) => return true,
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            _ => return false,
        }
    }
}
