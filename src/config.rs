//! Configuration management for the order cache service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! A `.env` file in the working directory is honoured when present.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const MIN_POOL_SIZE: u32 = 2;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub postgres: PostgresConfig,
    pub redpanda: RedpandaConfig,
    pub server: ServerConfig,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// How long to wait for a pooled connection, in seconds
    pub acquire_timeout_secs: u64,
    /// Run the embedded DDL on startup
    pub apply_schema: bool,
}

/// RedPanda/Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    pub group_id: String,
    /// Topic producers publish new orders to
    pub topic: String,
    /// Where a new consumer group starts reading: earliest or latest
    pub auto_offset_reset: String,
    /// Topic for permanently rejected payloads; `None` disables dead-lettering
    pub dead_letter_topic: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to their defaults.
    pub fn from_env() -> Self {
        Self {
            postgres: PostgresConfig {
                host: env_string("DB_HOST", "localhost"),
                port: env_or("DB_PORT", 5432),
                username: env_string("DB_USERNAME", "postgres"),
                password: env_string("DB_PASSWORD", "postgres"),
                database: env_string("DB_NAME", "orders_service"),
                max_connections: pool_size(env_or("DB_MAX_CONNECTIONS", 10)),
                acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", 5),
                apply_schema: env_or("DB_APPLY_SCHEMA", true),
            },
            redpanda: RedpandaConfig {
                brokers: env_string("KAFKA_BROKERS", "127.0.0.1:9092"),
                group_id: env_string("KAFKA_GROUP_ID", "order-cache"),
                topic: env_string("KAFKA_TOPIC", "orders"),
                auto_offset_reset: env_string("KAFKA_AUTO_OFFSET_RESET", "earliest"),
                dead_letter_topic: non_empty(env_string("KAFKA_DEAD_LETTER_TOPIC", "orders.dlq")),
            },
            server: ServerConfig {
                host: env_string("SERVER_HOST", "0.0.0.0"),
                port: env_or("SERVER_PORT", 8080),
            },
        }
    }
}

impl PostgresConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T: FromStr>(key: &str, raw: &str, default: T) -> T {
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key = %key, value = %raw, "Ignoring unparsable configuration value");
            default
        }
    }
}

/// Hydration streams order headers on one connection while reading each
/// order's rows on another, so the pool needs at least two.
fn pool_size(requested: u32) -> u32 {
    if requested < MIN_POOL_SIZE {
        tracing::warn!(
            requested = requested,
            using = MIN_POOL_SIZE,
            "DB_MAX_CONNECTIONS too small for hydration, raising it"
        );
        return MIN_POOL_SIZE;
    }
    requested
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
