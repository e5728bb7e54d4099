use std::time::Duration;

use thiserror::Error;
use type_mapping::SqlType;

use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Failed to open connection to {target}: {message}")]
    ConnectionFailed { target: String, message: String },

    #[error("Timed out after {timeout:?} opening connection to {target}")]
    ConnectTimeout { target: String, timeout: Duration },

    #[error("Procedure {procedure} failed: {message}")]
    ProcedureFailed { procedure: String, message: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Connection pool is not idle: {allocated} connection(s) still allocated")]
    PoolNotIdle { allocated: usize },

    #[error("{procedure} returned no row for id {id}")]
    RowNotFound { procedure: String, id: String },

    #[error("{procedure} did not return a value for output parameter {parameter}")]
    MissingOutput { procedure: String, parameter: String },

    #[error("Column {column} is missing from the result row")]
    MissingColumn { column: String },

    #[error("Column {column} holds {found}, expected {expected}")]
    ColumnType {
        column: String,
        expected: SqlType,
        found: String,
    },

    #[error("Column {column} has unsupported database type {type_name}")]
    UnsupportedColumnType { column: String, type_name: String },

    #[error("Parameter {parameter} of {procedure} is declared {declared} but carries {value}")]
    TypeMismatch {
        procedure: String,
        parameter: String,
        declared: SqlType,
        value: String,
    },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] ValidationError),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Transaction timed out after {0:?}")]
    TransactionTimeout(Duration),

    #[error("Distributed transactions are disabled; a second connection cannot enlist")]
    DistributedTransactionDisabled,
}

impl StoreError {
    /// Errors that leave the connection itself unusable
    pub fn is_connection_error(&self) -> bool {
        match self {
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            StoreError::ConnectionFailed { .. } | StoreError::ConnectTimeout { .. } => true,
            _ => false,
        }
    }
}
