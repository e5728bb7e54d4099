//! Convenience re-exports for common store-object usage

// Core traits
pub use crate::traits::{EntityRepository, ProcedureEntity, ProcedureKind};

// Entity model
pub use crate::entity::{
    validate_decimal_range, validate_id_required, validate_int_range, validate_length,
    EntityCore, Persistable,
};
pub use crate::id_type::EntityId;
pub use crate::user_error::{ErrorList, ErrorSeverity, UserError};

// Error types
pub use crate::errors::StoreError;

// Sessions and repositories
pub use crate::generic_store::{GenericRepository, RowCursor};
pub use crate::persisted_list::PersistedList;
pub use crate::session::{DbSession, PooledConnection, TranScope};

// Procedure calls
pub use crate::binding::*;
pub use crate::command::{DataRow, FromDataRow, ProcedureCall};
pub use type_mapping::{SqlType, SqlValue};

// Backends
pub use crate::backend::{Connector, MemoryConnector, MemoryDatabase, PgConnector};

// Common external dependencies that are frequently used
pub use async_trait::async_trait;
pub use chrono::{DateTime, Utc};
pub use rust_decimal::Decimal;
