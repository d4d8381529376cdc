//! Server configuration read from environment variables.

use std::time::Duration;

use identity_postgres::{DatabaseConfig, IsolationLevel};
use thiserror::Error;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_BIND_HOST: &str = "0.0.0.0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },

    #[error("{0} must be set when IDENTITY_STORE=postgres")]
    Missing(&'static str),
}

/// Which contact store backs the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Memory,
    Postgres {
        database: DatabaseConfig,
        isolation: IsolationLevel,
        init_schema: bool,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    pub store: StoreBackend,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = parse_or(&var, "PORT", DEFAULT_PORT)?;
        let bind_host = var("BIND_HOST").unwrap_or_else(|| DEFAULT_BIND_HOST.to_string());
        let database_url = var("DATABASE_URL");

        let backend = match var("IDENTITY_STORE") {
            Some(v) => v.trim().to_ascii_lowercase(),
            None if database_url.is_some() => "postgres".to_string(),
            None => "memory".to_string(),
        };

        let store = match backend.as_str() {
            "memory" => StoreBackend::Memory,
            "postgres" => {
                let database_url = database_url.ok_or(ConfigError::Missing("DATABASE_URL"))?;
                let defaults = DatabaseConfig::default();
                let acquire_secs = parse_or(
                    &var,
                    "DATABASE_ACQUIRE_TIMEOUT_SECS",
                    defaults.acquire_timeout.as_secs(),
                )?;
                let database = DatabaseConfig {
                    database_url,
                    max_connections: parse_or(
                        &var,
                        "DATABASE_POOL_SIZE",
                        defaults.max_connections,
                    )?,
                    acquire_timeout: Duration::from_secs(acquire_secs),
                    ..defaults
                };
                StoreBackend::Postgres {
                    database,
                    isolation: parse_or(&var, "IDENTITY_TX_ISOLATION", IsolationLevel::default())?,
                    init_schema: parse_or(&var, "IDENTITY_INIT_SCHEMA", true)?,
                }
            }
            _ => {
                return Err(ConfigError::Invalid {
                    name: "IDENTITY_STORE",
                    value: backend,
                })
            }
        };

        Ok(Self {
            bind_host,
            port,
            store,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
