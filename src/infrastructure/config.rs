// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Configuration
//!
//! YAML file with server / nats / database / redis / ai / logging / metrics
//! sections. Unknown keys are rejected. A fixed set of environment variables
//! overrides the file for containerized deployments.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub server: ServerSettings,
    pub nats: NatsSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub ai: AiSettings,
    pub logging: LoggingSettings,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub graceful_stop: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            graceful_stop: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NatsSettings {
    pub url: String,
    pub max_reconnect: usize,
    #[serde(with = "humantime_serde")]
    pub reconnect_wait: Duration,
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    pub max_pings_out: u16,
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".into(),
            max_reconnect: 60,
            reconnect_wait: Duration::from_secs(2),
            ping_interval: Duration::from_secs(20),
            max_pings_out: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    pub max_open_conns: u32,
    #[serde(with = "humantime_serde")]
    pub conn_max_lifetime: Duration,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            user: "aetherius".into(),
            password: String::new(),
            database: "aetherius".into(),
            ssl_mode: "disable".into(),
            max_open_conns: 25,
            conn_max_lifetime: Duration::from_secs(5 * 60),
        }
    }
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RedisSettings {
    pub addr: String,
    pub password: String,
    pub db: i64,
    pub pool_size: u32,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            addr: "localhost:6379".into(),
            password: String::new(),
            db: 0,
            pool_size: 10,
            dial_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AiSettings {
    pub reasoning_service_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            reasoning_service_url: "http://localhost:8000".into(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingSettings {
    /// trace, debug, info, warn, error
    pub level: String,
    /// json or console
    pub format: String,
    pub output_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "json".into(),
            output_path: "stdout".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub path: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".into(),
        }
    }
}

impl Config {
    /// Load from a YAML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;
        let mut config: Config =
            serde_yaml::from_str(&raw).context("failed to parse config file")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment wins over the file: DB_*, REDIS_*, NATS_URL,
    /// AI_SERVICE_URL.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("DB_HOST") {
            self.database.host = host;
        }
        if let Ok(port) = std::env::var("DB_PORT") {
            if let Ok(port) = port.parse() {
                self.database.port = port;
            }
        }
        if let Ok(user) = std::env::var("DB_USER") {
            self.database.user = user;
        }
        if let Ok(password) = std::env::var("DB_PASSWORD") {
            self.database.password = password;
        }
        if let Ok(name) = std::env::var("DB_NAME") {
            self.database.database = name;
        }
        if let Ok(addr) = std::env::var("REDIS_ADDR") {
            self.redis.addr = addr;
        }
        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            self.redis.password = password;
        }
        if let Ok(url) = std::env::var("NATS_URL") {
            self.nats.url = url;
        }
        if let Ok(url) = std::env::var("AI_SERVICE_URL") {
            self.ai.reasoning_service_url = url;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.nats.reconnect_wait, Duration::from_secs(2));
        assert_eq!(config.logging.level, "info");
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_parse_full_file() {
        let yaml = r#"
server:
  host: 127.0.0.1
  port: 9090
  read_timeout: 15s
  write_timeout: 15s
  graceful_stop: 5s
nats:
  url: nats://nats:4222
  max_reconnect: 10
  reconnect_wait: 2s
  ping_interval: 20s
  max_pings_out: 3
database:
  host: db
  port: 5432
  user: aetherius
  password: secret
  database: aetherius
  ssl_mode: disable
  max_open_conns: 25
  conn_max_lifetime: 5m
redis:
  addr: redis:6379
  password: ""
  db: 0
  pool_size: 10
  dial_timeout: 5s
ai:
  reasoning_service_url: http://reasoning:8000
  timeout: 30s
  max_retries: 3
logging:
  level: debug
  format: console
  output_path: stdout
metrics:
  enabled: true
  path: /metrics
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.nats.url, "nats://nats:4222");
        assert_eq!(
            config.database.connection_string(),
            "postgres://aetherius:secret@db:5432/aetherius?sslmode=disable"
        );
        assert_eq!(config.ai.reasoning_service_url, "http://reasoning:8000");
        assert_eq!(config.logging.format, "console");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let yaml = "server:\n  port: 8080\n  bogus_knob: true\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());

        let yaml = "surprise_section:\n  x: 1\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        std::env::set_var("DB_HOST", "db.internal");
        std::env::set_var("NATS_URL", "nats://bus.internal:4222");
        std::env::set_var("AI_SERVICE_URL", "http://reasoning.internal:8000");
        config.apply_env_overrides();
        std::env::remove_var("DB_HOST");
        std::env::remove_var("NATS_URL");
        std::env::remove_var("AI_SERVICE_URL");

        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.nats.url, "nats://bus.internal:4222");
        assert_eq!(config.ai.reasoning_service_url, "http://reasoning.internal:8000");
    }
}
