//! Backend boundary.
//!
//! A [`Connector`] opens connections to one [`ConnectionTarget`]; each
//! [`ProcedureConnection`] runs procedure calls and transaction control on a
//! single physical connection. The pool, session and repository layers only
//! ever talk to these traits.

pub mod memory;
pub mod postgres;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use config::DatabaseConfig;

use crate::command::{DataRow, ProcedureCall};
use crate::errors::StoreError;

pub use memory::{MemoryConnection, MemoryConnector, MemoryDatabase, ProcedureContext};
pub use postgres::{PgConnector, PgProcedureConnection};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_COMMAND_TIMEOUT: Duration =
    Duration::from_secs(config::DEFAULT_COMMAND_TIMEOUT_SECONDS);

/// Where a pool's handles connect to
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    key: String,
    connection_string: String,
    display: String,
    schema: Option<String>,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl ConnectionTarget {
    pub fn new(key: impl Into<String>, connection_string: impl Into<String>) -> Self {
        let connection_string = connection_string.into();
        Self {
            key: key.into(),
            display: connection_string.clone(),
            connection_string,
            schema: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Target for a named `[connections.<key>]` entry
    pub fn from_config(key: &str, database: &DatabaseConfig) -> Self {
        Self {
            key: key.to_string(),
            connection_string: database.connection_string(),
            display: database.display_string(),
            schema: database.schema.clone(),
            connect_timeout: Duration::from_secs(database.connection_timeout_seconds),
            command_timeout: Duration::from_secs(database.command_timeout_seconds),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Description without credentials
    pub fn display_string(&self) -> &str {
        &self.display
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("key", &self.key)
            .field("target", &self.display)
            .field("schema", &self.schema)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Opens connections for a pool
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: ProcedureConnection;

    /// Failures are returned as-is; retry policy belongs to the caller
    async fn connect(&self, target: &ConnectionTarget) -> Result<Self::Connection, StoreError>;
}

/// One open connection able to run stored procedures
#[async_trait]
pub trait ProcedureConnection: Send + 'static {
    /// Run a procedure that returns a result set
    async fn query(&mut self, call: &ProcedureCall) -> Result<Vec<DataRow>, StoreError>;

    /// Run a procedure for its effects; output parameters are written back
    /// into `call`
    async fn execute(&mut self, call: &mut ProcedureCall) -> Result<(), StoreError>;

    async fn begin(&mut self) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// First phase of a two-phase commit; the connection leaves the
    /// transaction and `gid` names it until it is resolved
    async fn prepare(&mut self, gid: &str) -> Result<(), StoreError>;

    async fn commit_prepared(&mut self, gid: &str) -> Result<(), StoreError>;

    async fn rollback_prepared(&mut self, gid: &str) -> Result<(), StoreError>;

    async fn ping(&mut self) -> Result<(), StoreError>;

    async fn close(self) -> Result<(), StoreError>
    where
        Self: Sized;
}
