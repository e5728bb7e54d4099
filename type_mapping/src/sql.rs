//! SQL type conversion utilities
//!
//! This module handles conversion between declared wire types and their
//! PostgreSQL equivalents.

use crate::types::SqlType;

/// PostgreSQL type used to carry a declared wire type
pub fn pg_type_name(sql_type: SqlType) -> &'static str {
    match sql_type {
        SqlType::Int => "INTEGER",
        // PostgreSQL has no 1-byte integer; SMALLINT carries 0..=255 losslessly
        SqlType::TinyInt => "SMALLINT",
        SqlType::VarChar => "VARCHAR",
        SqlType::Money => "NUMERIC(19,4)",
        SqlType::DateTime => "TIMESTAMP WITH TIME ZONE",
    }
}

/// Map a PostgreSQL column type name (as reported by the driver) to the
/// wire type used when decoding result rows
pub fn pg_type_to_sql_type(pg_type: &str) -> Option<SqlType> {
    match pg_type.to_ascii_uppercase().as_str() {
        "INT4" | "INTEGER" | "INT8" | "BIGINT" => Some(SqlType::Int),
        "INT2" | "SMALLINT" | "BOOL" | "BOOLEAN" => Some(SqlType::TinyInt),
        "VARCHAR" | "TEXT" | "BPCHAR" | "CHAR" | "NAME" => Some(SqlType::VarChar),
        "NUMERIC" | "DECIMAL" => Some(SqlType::Money),
        "TIMESTAMPTZ" | "TIMESTAMP" => Some(SqlType::DateTime),
        _ => None,
    }
}
