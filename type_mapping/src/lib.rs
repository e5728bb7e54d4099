//! Unified wire-type mapping for stored-procedure parameters and result rows
//! This crate provides the type vocabulary shared by parameter binding and
//! row decoding across the procstore ecosystem

pub mod sql;
pub mod types;
pub mod validate;

pub use sql::{pg_type_name, pg_type_to_sql_type};
pub use types::{ParameterDirection, SqlType, SqlValue};
pub use validate::is_compatible;
