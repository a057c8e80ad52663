//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Which store backs the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// In-process tables, lost on exit.
    Memory,
    /// SQLite database URL, e.g. `sqlite://data/entities.db` or `sqlite::memory:`
    Sqlite(String),
}

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,

    /// Maximum pooled connections (forced to 1 for in-memory SQLite)
    pub max_connections: u32,

    /// How long to wait for a pooled connection
    pub connect_timeout: Duration,

    /// YAML schema file
    pub schema_path: PathBuf,

    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite::memory:".to_string());
        let store = if database_url == "memory" {
            StoreConfig::Memory
        } else {
            StoreConfig::Sqlite(database_url)
        };

        let max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .context("Invalid DATABASE_MAX_CONNECTIONS")?;

        let connect_timeout = lookup("DATABASE_CONNECT_TIMEOUT_SECS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .map(Duration::from_secs)
            .context("Invalid DATABASE_CONNECT_TIMEOUT_SECS")?;

        let schema_path = lookup("SCHEMA_PATH")
            .unwrap_or_else(|| "./schema.yaml".to_string())
            .into();

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => bail!("Invalid LOG_FORMAT `{other}`, expected `pretty` or `json`"),
        };

        Ok(Self {
            store,
            max_connections,
            connect_timeout,
            schema_path,
            log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.store, StoreConfig::Sqlite("sqlite::memory:".into()));
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.schema_path, PathBuf::from("./schema.yaml"));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_memory_store_and_json_logs() {
        let config = config(&[("DATABASE_URL", "memory"), ("LOG_FORMAT", "json")]).unwrap();
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_numbers_are_reported() {
        let err = config(&[("DATABASE_MAX_CONNECTIONS", "many")]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_MAX_CONNECTIONS"));
    }
}
