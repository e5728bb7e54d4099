//! Store Object - core data-access layer for ProcStore
//!
//! This crate provides connection pooling, database sessions, transaction
//! scopes, stored-procedure calls and the generic entity repository.

// Per-call logging that compiles away unless `debug-logging` is enabled
#[cfg(feature = "debug-logging")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "debug-logging")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use trace_log;

pub mod backend;
pub mod binding;
pub mod command;
pub mod entity;
pub mod errors;
pub mod generic_store;
pub mod id_type;
pub mod persisted_list;
pub mod prelude;
pub mod session;
pub mod traits;
pub mod user_error;
pub mod validation;

pub use backend::{
    ConnectionTarget, Connector, MemoryConnector, MemoryDatabase, PgConnector, ProcedureConnection,
};
pub use command::{DataRow, FromDataRow, ProcedureCall, SqlParameter};
pub use entity::{EntityCore, Persistable};
pub use errors::StoreError;
pub use generic_store::{GenericRepository, RowCursor};
pub use id_type::{EntityId, ErasedId};
pub use persisted_list::PersistedList;
pub use session::{
    ConnectionPool, DbSession, LeakHook, PooledConnection, PooledHandle, SessionPhase, TranScope,
};
pub use traits::*;
pub use user_error::{ErrorList, ErrorSeverity, UserError};
pub use validation::{ValidatedParamName, ValidatedProcName, ValidationError};

pub use type_mapping::{ParameterDirection, SqlType, SqlValue};
