//! Configuration management following 12-factor app principles
//!
//! All configuration is loaded from environment variables to ensure
//! clean separation between code and config.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Storage backend behind the conversation store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Networked PostgreSQL (production)
    Postgres,
    /// Embedded SQLite (tests, local development)
    Sqlite,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(anyhow::anyhow!("Unknown DATABASE_BACKEND: {}", other)),
        }
    }
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Postgres => write!(f, "postgres"),
            StorageBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Connection settings for the storage adapter factory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    /// Connection URL (PostgreSQL) or file path / `:memory:` (SQLite)
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// In-memory SQLite, the configuration used by tests
    pub fn in_memory() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            url: ":memory:".to_string(),
            max_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage selection and connection settings
    pub database: DatabaseConfig,

    /// Default deadline for a single generation call
    pub generation_timeout: Duration,

    /// Number of recent messages handed to the generator as context
    pub history_limit: usize,

    /// Runtime configuration
    pub rust_log: String,
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let testing = env::var("TESTING")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let backend = if testing {
            StorageBackend::Sqlite
        } else {
            env::var("DATABASE_BACKEND")
                .unwrap_or_else(|_| "postgres".to_string())
                .parse()?
        };

        let url = match backend {
            StorageBackend::Postgres => env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?,
            StorageBackend::Sqlite => {
                env::var("SQLITE_PATH").unwrap_or_else(|_| ":memory:".to_string())
            }
        };

        let config = Self {
            database: DatabaseConfig {
                backend,
                url,
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5),
            },
            generation_timeout: Duration::from_secs(parse_or("GENERATION_TIMEOUT_SECS", 60)),
            history_limit: parse_or("HISTORY_LIMIT", 10),
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "threadline=debug".to_string()),
            port: parse_or("PORT", 3000),
        };

        Ok(config)
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
