//! Connection parameters for the RethinkDB bootstrap.

use thiserror::Error;

const RETHINKDB_HOST: &str = "rethinkdb";
const RETHINKDB_PORT: u16 = 8080;
const RETHINKDB_TIMEOUT_SECONDS: u64 = 60;
const RETHINKDB_DATABASE: &str = "RTDB_desync";

/// A connection parameter that cannot be used for a connection attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("host '{0}' must not contain whitespace")]
    MalformedHost(String),

    #[error("port must be non-zero")]
    ZeroPort,

    #[error("timeout must be at least one second")]
    ZeroTimeout,

    #[error("database name must not be empty")]
    EmptyDatabase,

    #[error("database name '{0}' may only contain letters, digits and underscores")]
    MalformedDatabase(String),
}

/// Immutable parameters for a single connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    timeout_seconds: u64,
    database_name: String,
}

impl ConnectionConfig {
    /// The compiled-in endpoint of the desync RethinkDB instance.
    pub fn rethinkdb() -> Self {
        Self {
            host: RETHINKDB_HOST.to_string(),
            port: RETHINKDB_PORT,
            timeout_seconds: RETHINKDB_TIMEOUT_SECONDS,
            database_name: RETHINKDB_DATABASE.to_string(),
        }
    }

    /// Build a config from explicit parts, rejecting malformed values.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        timeout_seconds: u64,
        database_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            host: host.into(),
            port,
            timeout_seconds,
            database_name: database_name.into(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// `host:port` as handed to the resolver.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check that every field is present and well-formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.host.chars().any(char::is_whitespace) {
            return Err(ConfigError::MalformedHost(self.host.clone()));
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.database_name.is_empty() {
            return Err(ConfigError::EmptyDatabase);
        }
        if !self
            .database_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::MalformedDatabase(self.database_name.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rethinkdb_config_matches_literals() {
        let config = ConnectionConfig::rethinkdb();
        assert_eq!(config.host().as_bytes(), b"rethinkdb");
        assert_eq!(config.port(), 8080);
        assert_eq!(config.timeout_seconds(), 60);
        assert_eq!(config.database_name().as_bytes(), b"RTDB_desync");
    }

    #[test]
    fn rethinkdb_config_is_well_formed() {
        assert_eq!(ConnectionConfig::rethinkdb().validate(), Ok(()));
        assert_eq!(ConnectionConfig::rethinkdb().address(), "rethinkdb:8080");
    }

    #[test]
    fn new_rejects_malformed_fields() {
        assert_eq!(
            ConnectionConfig::new("", 8080, 60, "db"),
            Err(ConfigError::EmptyHost)
        );
        assert_eq!(
            ConnectionConfig::new("rethink db", 8080, 60, "db"),
            Err(ConfigError::MalformedHost("rethink db".to_string()))
        );
        assert_eq!(
            ConnectionConfig::new("rethinkdb", 0, 60, "db"),
            Err(ConfigError::ZeroPort)
        );
        assert_eq!(
            ConnectionConfig::new("rethinkdb", 8080, 0, "db"),
            Err(ConfigError::ZeroTimeout)
        );
        assert_eq!(
            ConnectionConfig::new("rethinkdb", 8080, 60, ""),
            Err(ConfigError::EmptyDatabase)
        );
        assert_eq!(
            ConnectionConfig::new("rethinkdb", 8080, 60, "RTDB-desync"),
            Err(ConfigError::MalformedDatabase("RTDB-desync".to_string()))
        );
    }

    #[test]
    fn new_accepts_loopback_endpoint() {
        let config = ConnectionConfig::new("127.0.0.1", 28015, 5, "test").unwrap();
        assert_eq!(config.address(), "127.0.0.1:28015");
    }
}
