//! # ProcStore
//!
//! A data-access layer for entity-oriented applications whose database is
//! reached through stored procedures: pooled sessions, transaction scopes
//! with two-phase promotion, and a generic repository mapping entity CRUD
//! to `Get<Entity>`/`Insert<Entity>`/`Update<Entity>`/`Delete<Entity>`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use procstore::prelude::*;
//!
//! entity_id!(pub CustomerId);
//!
//! #[derive(Debug, Default)]
//! pub struct Customer {
//!     core: EntityCore<CustomerId>,
//!     name: Option<String>,
//! }
//!
//! impl Customer {
//!     pub fn set_name(&mut self, value: Option<&str>) {
//!         self.core.assign_text(&mut self.name, value.map(str::to_string));
//!     }
//! }
//!
//! impl Persistable for Customer {
//!     type Id = CustomerId;
//!     fn core(&self) -> &EntityCore<CustomerId> { &self.core }
//!     fn core_mut(&mut self) -> &mut EntityCore<CustomerId> { &mut self.core }
//! }
//!
//! impl ProcedureEntity for Customer {
//!     type Row = DataRow;
//!
//!     fn entity_name() -> &'static str {
//!         "Customer"
//!     }
//!
//!     fn create_entity(row: DataRow) -> Result<Self, StoreError> {
//!         Ok(Customer {
//!             core: EntityCore::loaded(
//!                 row.get_id("CustomerId")?,
//!                 row.get_datetime("CreateDate")?,
//!                 row.get_datetime("ModifyDate")?,
//!             ),
//!             name: row.get_opt_string("Name")?,
//!         })
//!     }
//!
//!     fn add_insert_update_params(&self, call: &mut ProcedureCall) {
//!         add_param_varchar(call, "@Name", self.name.as_deref());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let procstore = ProcStore::postgres(&config, "crm")?;
//!     let customers = GenericRepository::<Customer, _>::new(procstore.session().clone());
//!
//!     let scope = procstore.session().create_tran_scope();
//!     let mut customer = Customer::default();
//!     customer.set_name(Some("Acme"));
//!     customers.insert(&mut customer).await?;
//!     scope.complete().await?;
//!
//!     let loaded = customers.get(customer.id()).await?;
//!     println!("Saved customer {}", loaded.id());
//!
//!     procstore.shutdown().await;
//!     Ok(())
//! }
//! ```

/// Conditional debug logging macros
/// These macros only compile in code when the `debug-logging` feature is enabled
#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

pub mod core;
pub mod errors;
pub mod prelude;

// Re-export the main public types for convenience
pub use self::core::ProcStore;
pub use errors::ProcStoreError;

// Re-export centralized config
pub use config::{AppConfig, DatabaseConfig, SessionConfig, TransactionConfig};

// Re-export internal crates used by macros and public API
pub use store_object;
pub use type_mapping;

// Re-export external dependencies used in public API
pub use sqlx;
pub use async_trait;
