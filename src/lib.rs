// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Aetherius Control Plane
//!
//! Control plane for the Aetherius Kubernetes fleet-management platform.
//!
//! # Architecture
//!
//! - **domain**: entities, value objects and repository ports
//! - **application**: agent registry, event pipeline, command dispatcher,
//!   workflow engine and strategy matcher
//! - **infrastructure**: PostgreSQL, Redis, NATS and HTTP adapters
//! - **presentation**: REST facade

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
