// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod memory;
pub mod postgres_agent;
pub mod postgres_cluster;
pub mod postgres_command;
pub mod postgres_event;
pub mod postgres_strategy;
pub mod postgres_workflow;

pub use postgres_agent::PostgresAgentRepository;
pub use postgres_cluster::PostgresClusterRepository;
pub use postgres_command::PostgresCommandRepository;
pub use postgres_event::PostgresEventRepository;
pub use postgres_strategy::PostgresStrategyRepository;
pub use postgres_workflow::{PostgresExecutionRepository, PostgresWorkflowRepository};
