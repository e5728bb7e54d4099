//! Validation utilities for type mapping
//!
//! This module provides validation functions
//! for type mapping operations.

use crate::types::{SqlType, SqlValue};

/// Check whether a value may be sent for a parameter declared with `sql_type`.
/// NULL is acceptable for every declared type.
pub fn is_compatible(sql_type: SqlType, value: &SqlValue) -> bool {
    match (sql_type, value) {
        (_, SqlValue::Null) => true,
        (SqlType::Int, SqlValue::Int(_) | SqlValue::TinyInt(_)) => true,
        (SqlType::TinyInt, SqlValue::TinyInt(_)) => true,
        (SqlType::TinyInt, SqlValue::Int(v)) => u8::try_from(*v).is_ok(),
        (SqlType::VarChar, SqlValue::VarChar(_)) => true,
        (SqlType::Money, SqlValue::Money(_) | SqlValue::Int(_)) => true,
        (SqlType::DateTime, SqlValue::DateTime(_)) => true,
        _ => false,
    }
}
