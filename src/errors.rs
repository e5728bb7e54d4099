//! Error types for the ProcStore crate
//!
//! This module contains all error types that can be returned by ProcStore operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcStoreError {
    #[error(transparent)]
    Store(#[from] store_object::StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Repository already registered: {0}")]
    RepositoryAlreadyRegistered(String),
}
