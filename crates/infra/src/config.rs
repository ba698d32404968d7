//! Environment-driven configuration.
//!
//! Store connection coordinates and bus subscription coordinates are
//! supplied at process start and injected explicitly; nothing in the core
//! pipeline reads the environment on its own.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Relational store coordinates.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Durable bus coordinates (used when the `redis` feature is enabled).
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub redis_url: String,
    pub stream_key: String,
    pub dlq_key: String,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// `None` means in-memory store wiring (dev/test).
    pub database: Option<DatabaseConfig>,
    /// `None` means in-memory bus wiring (dev/test).
    pub bus: Option<BusConfig>,
}

impl AppConfig {
    /// Read configuration from the process environment.
    ///
    /// - `BIND_ADDR` (default `0.0.0.0:8080`)
    /// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS` (default 5)
    /// - `REDIS_URL`, `EVENT_STREAM_KEY`, `EVENT_DLQ_KEY`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let database = match get("DATABASE_URL") {
            Some(url) => {
                let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
                    Some(raw) => raw
                        .parse::<u32>()
                        .map_err(|_| ConfigError::Invalid("DATABASE_MAX_CONNECTIONS", raw))?,
                    None => 5,
                };
                Some(DatabaseConfig {
                    url,
                    max_connections,
                })
            }
            None => None,
        };

        let bus = get("REDIS_URL").map(|redis_url| BusConfig {
            redis_url,
            stream_key: get("EVENT_STREAM_KEY").unwrap_or_else(|| "dinesync:events".to_string()),
            dlq_key: get("EVENT_DLQ_KEY").unwrap_or_else(|| "dinesync:events:dlq".to_string()),
        });

        Ok(Self {
            bind_addr,
            database,
            bus,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |name| map.get(name).map(|v| v.to_string())
    }

    #[test]
    fn defaults_to_in_memory_wiring() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert!(config.database.is_none());
        assert!(config.bus.is_none());
    }

    #[test]
    fn reads_database_and_bus_coordinates() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/dinesync"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
            ("REDIS_URL", "redis://localhost:6379"),
        ]))
        .unwrap();

        let db = config.database.unwrap();
        assert_eq!(db.url, "postgres://localhost/dinesync");
        assert_eq!(db.max_connections, 12);

        let bus = config.bus.unwrap();
        assert_eq!(bus.stream_key, "dinesync:events");
        assert_eq!(bus.dlq_key, "dinesync:events:dlq");
    }

    #[test]
    fn rejects_malformed_pool_size() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/dinesync"),
            ("DATABASE_MAX_CONNECTIONS", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("DATABASE_MAX_CONNECTIONS", _)));
    }
}
