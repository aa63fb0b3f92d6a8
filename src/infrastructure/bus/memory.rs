// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process message bus.
//!
//! Fan-out over bounded channels with NATS-style subject matching. Used by
//! the test suite and single-node development runs; delivery is
//! fire-and-forget and a full subscriber drops messages, matching the
//! at-most-once bus contract.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use super::{subject_matches, BusError, BusMessage, BusSubscription, MessageBus};

const CHANNEL_CAPACITY: usize = 1024;

struct Subscriber {
    pattern: String,
    sender: mpsc::Sender<BusMessage>,
}

pub struct InMemoryBus {
    subscribers: Mutex<Vec<Subscriber>>,
    connected: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Simulate a connection drop (tests).
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn deliver(&self, subject: &str, payload: &[u8], reply: Option<&str>) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|sub| !sub.sender.is_closed());
        for sub in subscribers.iter() {
            if subject_matches(&sub.pattern, subject) {
                let message = BusMessage {
                    subject: subject.to_string(),
                    payload: payload.to_vec(),
                    reply: reply.map(str::to_string),
                };
                if sub.sender.try_send(message).is_err() {
                    warn!(subject = %subject, "subscriber channel full, message dropped");
                }
            }
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::Disconnected);
        }
        self.deliver(subject, &payload, None);
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<BusMessage, BusError> {
        if !self.is_connected() {
            return Err(BusError::Disconnected);
        }
        let inbox = format!("_INBOX.{}", uuid::Uuid::new_v4());
        let mut subscription = self.subscribe(&inbox).await?;
        self.deliver(subject, &payload, Some(&inbox));

        tokio::time::timeout(timeout, subscription.recv())
            .await
            .map_err(|_| BusError::RequestTimeout)?
            .ok_or(BusError::RequestTimeout)
    }

    async fn subscribe(&self, subject: &str) -> Result<BusSubscription, BusError> {
        if !self.is_connected() {
            return Err(BusError::Disconnected);
        }
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber {
                pattern: subject.to_string(),
                sender,
            });
        Ok(BusSubscription::new(receiver))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
