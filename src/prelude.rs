//! Convenience re-exports for common ProcStore usage
//!
//! This prelude module re-exports the most commonly used items from the ProcStore workspace,
//! making it easier to import everything you need with a single use statement.
//!
//! # Example
//!
//! ```rust
//! use procstore::prelude::*;
//!
//! // Now you have access to the session, repository and entity types
//! ```

// Core ProcStore components
pub use crate::core::ProcStore;
pub use crate::errors::ProcStoreError;

// Re-export centralized config
pub use config::{AppConfig, DatabaseConfig, SessionConfig, TransactionConfig};

// Re-export commonly used store-object types for convenience
pub use store_object::prelude::*;

// Re-export store_object module for macro-generated code
pub use store_object;
pub use store_object::entity_id;

// Common external dependencies
pub use anyhow;
pub use async_trait;
pub use sqlx;
pub use tokio;
