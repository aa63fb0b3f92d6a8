// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod bus;
pub mod clients;
pub mod config;
pub mod db;
pub mod memory_cache;
pub mod redis_cache;
pub mod repositories;
