//! # Configuration Management for ProcStore
//!
//! This crate provides the configuration structures consumed by database
//! sessions: named connection entries, pool diagnostics and transaction
//! settings.
//!
//! ## Quick Start
//!
//! ### Programmatic Configuration
//! ```rust
//! use config::{AppConfig, DatabaseConfig};
//!
//! let db_config = DatabaseConfig::new(
//!     "localhost".to_string(), 5432, "orders".to_string(),
//!     "postgres".to_string(), "password".to_string(),
//! );
//!
//! let config = AppConfig::single("orders", db_config);
//! assert!(config.connection("orders").is_ok());
//! ```
//!
//! ### TOML File Configuration
//! ```toml
//! [connections.orders]
//! host = "localhost"
//! port = 5432
//! database = "orders"
//! username = "postgres"
//! password = "password"
//! schema = "dbo"
//! connection_timeout_seconds = 30
//! command_timeout_seconds = 3600
//!
//! [session]
//! leak_threshold = 5
//!
//! [transaction]
//! timeout_seconds = 28800
//! allow_distributed = true
//! ```
//!
//! Load configuration:
//! ```rust,no_run
//! use config::AppConfig;
//!
//! // Load from procstore.toml (or the file named by PROCSTORE_CONFIG)
//! let config = AppConfig::load()?;
//!
//! // Or load from custom path
//! let config = AppConfig::from_file("config/production.toml")?;
//! # Ok::<(), config::ConfigError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{env, path::Path};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "./procstore.toml";
const CONFIG_PATH_VAR: &str = "PROCSTORE_CONFIG";

/// Default command timeout: one hour, long enough for batch procedures.
pub const DEFAULT_COMMAND_TIMEOUT_SECONDS: u64 = 60 * 60;
/// Default transaction timeout: eight hours, so stepping through code in a
/// debugger does not roll the transaction back underneath the developer.
pub const DEFAULT_TRANSACTION_TIMEOUT_SECONDS: u64 = 8 * 60 * 60;
/// More concurrently allocated handles than this on one pool is probably a leak.
pub const DEFAULT_LEAK_THRESHOLD: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Environment variable error: {0}")]
    Env(#[from] env::VarError),
    #[error("Dotenvy error: {0}")]
    Dotenvy(#[from] dotenvy::Error),
    #[error("Unknown connection key: {0}")]
    UnknownConnection(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub connections: BTreeMap<String, DatabaseConfig>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub transaction: TransactionConfig,
}

/// Database configuration for one named connection target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Schema that unqualified procedure names resolve in.
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
}

/// Session and pool diagnostics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_leak_threshold")]
    pub leak_threshold: usize,
}

/// Transactional scope configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    #[serde(default = "default_transaction_timeout")]
    pub timeout_seconds: u64,
    /// Whether a scope may escalate to a two-phase (distributed) commit
    /// once a second handle enlists.
    #[serde(default = "default_allow_distributed")]
    pub allow_distributed: bool,
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECONDS
}

fn default_leak_threshold() -> usize {
    DEFAULT_LEAK_THRESHOLD
}

fn default_transaction_timeout() -> u64 {
    DEFAULT_TRANSACTION_TIMEOUT_SECONDS
}

fn default_allow_distributed() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            leak_threshold: DEFAULT_LEAK_THRESHOLD,
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TRANSACTION_TIMEOUT_SECONDS,
            allow_distributed: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file specified in .env or defaults
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is fine; a malformed one is not.
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }

        if let Ok(config_path) = env::var(CONFIG_PATH_VAR) {
            Self::from_file(&config_path)
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::from_file(DEFAULT_CONFIG_PATH)
        } else {
            Err(ConfigError::Invalid(format!(
                "Config path must be specified in .env file as {} or in {} file",
                CONFIG_PATH_VAR, DEFAULT_CONFIG_PATH
            )))
        }
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration with a single named connection and default settings
    pub fn single(key: &str, database: DatabaseConfig) -> Self {
        let mut connections = BTreeMap::new();
        connections.insert(key.to_string(), database);
        Self {
            connections,
            session: SessionConfig::default(),
            transaction: TransactionConfig::default(),
        }
    }

    /// Resolve a named connection-configuration key
    pub fn connection(&self, key: &str) -> Result<&DatabaseConfig, ConfigError> {
        self.connections
            .get(key)
            .ok_or_else(|| ConfigError::UnknownConnection(key.to_string()))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connections.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one [connections.<key>] entry is required".to_string(),
            ));
        }
        for (key, database) in &self.connections {
            database
                .validate()
                .map_err(|message| ConfigError::Invalid(format!("connection '{}': {}", key, message)))?;
        }

        if self.session.leak_threshold == 0 {
            return Err(ConfigError::Invalid(
                "Session leak_threshold must be greater than 0".to_string(),
            ));
        }
        if self.transaction.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "Transaction timeout_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    /// Create a new database configuration with default timeouts
    pub fn new(
        host: String,
        port: u16,
        database: String,
        username: String,
        password: String,
    ) -> Self {
        Self {
            host,
            port,
            database,
            username,
            password,
            schema: None,
            connection_timeout_seconds: default_connection_timeout(),
            command_timeout_seconds: DEFAULT_COMMAND_TIMEOUT_SECONDS,
        }
    }

    /// Set the schema unqualified procedure names resolve in
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Build connection string
    pub fn connection_string(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }

    /// Connection description safe to show in logs and UIs (no password)
    pub fn display_string(&self) -> String {
        format!(
            "postgresql://{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }

    fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("host cannot be empty".to_string());
        }
        if self.port == 0 {
            return Err("port cannot be zero".to_string());
        }
        if self.database.is_empty() {
            return Err("database name cannot be empty".to_string());
        }
        if self.username.is_empty() {
            return Err("username cannot be empty".to_string());
        }
        if self.connection_timeout_seconds == 0 {
            return Err("connection_timeout_seconds must be greater than 0".to_string());
        }
        if self.command_timeout_seconds == 0 {
            return Err("command_timeout_seconds must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [connections.orders]
        host = "localhost"
        port = 5432
        database = "orders"
        username = "app"
        password = "secret"
        schema = "dbo"

        [transaction]
        timeout_seconds = 60
    "#;

    #[test]
    fn test_parse_named_connection() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let orders = config.connection("orders").unwrap();

        assert_eq!(orders.schema.as_deref(), Some("dbo"));
        assert_eq!(orders.command_timeout_seconds, DEFAULT_COMMAND_TIMEOUT_SECONDS);
        assert_eq!(config.session.leak_threshold, DEFAULT_LEAK_THRESHOLD);
        assert_eq!(config.transaction.timeout_seconds, 60);
        assert!(config.transaction.allow_distributed);
    }

    #[test]
    fn test_unknown_connection_key() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert!(matches!(
            config.connection("billing"),
            Err(ConfigError::UnknownConnection(key)) if key == "billing"
        ));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let empty_host = SAMPLE.replace("host = \"localhost\"", "host = \"\"");
        assert!(matches!(
            AppConfig::from_toml_str(&empty_host),
            Err(ConfigError::Invalid(_))
        ));

        let zero_threshold = format!("{}\n[session]\nleak_threshold = 0\n", SAMPLE);
        assert!(matches!(
            AppConfig::from_toml_str(&zero_threshold),
            Err(ConfigError::Invalid(_))
        ));

        assert!(matches!(
            AppConfig::from_toml_str("connections = {}"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_display_string_hides_password() {
        let db = DatabaseConfig::new(
            "db.internal".to_string(),
            5432,
            "orders".to_string(),
            "app".to_string(),
            "hunter2".to_string(),
        );
        assert!(db.connection_string().contains("hunter2"));
        assert!(!db.display_string().contains("hunter2"));
    }
}
