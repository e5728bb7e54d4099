//! Type mapping definitions
//!
//! This module provides the declared wire types of stored-procedure
//! parameters and the runtime values carried by parameters and row columns.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared wire type of a procedure parameter or result column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    /// 32-bit integer, also used for identities
    Int,
    /// 1-byte unsigned integer, also used for booleans
    TinyInt,
    /// Variable-length character data
    VarChar,
    /// Fixed-point currency
    Money,
    /// Date and time
    DateTime,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Int => "int",
            SqlType::TinyInt => "tinyint",
            SqlType::VarChar => "varchar",
            SqlType::Money => "money",
            SqlType::DateTime => "datetime",
        };
        f.write_str(name)
    }
}

/// Direction of a procedure parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
}

impl ParameterDirection {
    /// Whether the caller supplies a value for this parameter
    pub fn is_input(self) -> bool {
        matches!(self, ParameterDirection::Input | ParameterDirection::InputOutput)
    }

    /// Whether the procedure returns a value through this parameter
    pub fn is_output(self) -> bool {
        matches!(self, ParameterDirection::Output | ParameterDirection::InputOutput)
    }
}

/// Runtime value of a parameter or column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Int(i32),
    TinyInt(u8),
    VarChar(String),
    Money(Decimal),
    DateTime(DateTime<Utc>),
    Null,
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// The wire type this value naturally carries; `None` for NULL
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            SqlValue::Int(_) => Some(SqlType::Int),
            SqlValue::TinyInt(_) => Some(SqlType::TinyInt),
            SqlValue::VarChar(_) => Some(SqlType::VarChar),
            SqlValue::Money(_) => Some(SqlType::Money),
            SqlValue::DateTime(_) => Some(SqlType::DateTime),
            SqlValue::Null => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            SqlValue::Int(v) => Some(*v),
            SqlValue::TinyInt(v) => Some(i32::from(*v)),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            SqlValue::TinyInt(v) => Some(*v),
            SqlValue::Int(v) => u8::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::VarChar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            SqlValue::Money(d) => Some(*d),
            SqlValue::Int(v) => Some(Decimal::from(*v)),
            SqlValue::TinyInt(v) => Some(Decimal::from(*v)),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            SqlValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Int(v) => write!(f, "{}", v),
            SqlValue::TinyInt(v) => write!(f, "{}", v),
            SqlValue::VarChar(s) => write!(f, "'{}'", s),
            SqlValue::Money(d) => write!(f, "{}", d),
            SqlValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            SqlValue::Null => f.write_str("NULL"),
        }
    }
}

impl From<i32> for SqlValue {
    fn from(val: i32) -> Self {
        SqlValue::Int(val)
    }
}

impl From<u8> for SqlValue {
    fn from(val: u8) -> Self {
        SqlValue::TinyInt(val)
    }
}

/// Booleans travel as a 1-byte integer (0/1)
impl From<bool> for SqlValue {
    fn from(val: bool) -> Self {
        SqlValue::TinyInt(u8::from(val))
    }
}

impl From<String> for SqlValue {
    fn from(val: String) -> Self {
        SqlValue::VarChar(val)
    }
}

impl From<&str> for SqlValue {
    fn from(val: &str) -> Self {
        SqlValue::VarChar(val.to_string())
    }
}

impl From<Decimal> for SqlValue {
    fn from(val: Decimal) -> Self {
        SqlValue::Money(val)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(val: DateTime<Utc>) -> Self {
        SqlValue::DateTime(val)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(val: Option<T>) -> Self {
        match val {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_bool_travels_as_tinyint() {
        assert_eq!(SqlValue::from(true), SqlValue::TinyInt(1));
        assert_eq!(SqlValue::from(false), SqlValue::TinyInt(0));
    }

    #[test]
    fn test_option_maps_to_null() {
        assert_eq!(SqlValue::from(None::<i32>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(7)), SqlValue::Int(7));
    }

    #[test]
    fn test_accessors_widen_but_never_narrow_lossily() {
        assert_eq!(SqlValue::TinyInt(3).as_i32(), Some(3));
        assert_eq!(SqlValue::Int(300).as_u8(), None);
        assert_eq!(
            SqlValue::Int(4).as_decimal(),
            Some(Decimal::from_str("4").unwrap())
        );
        assert_eq!(SqlValue::VarChar("x".into()).as_i32(), None);
    }

    #[test]
    fn test_direction_flags() {
        assert!(ParameterDirection::Input.is_input());
        assert!(!ParameterDirection::Output.is_input());
        assert!(ParameterDirection::InputOutput.is_input());
        assert!(ParameterDirection::InputOutput.is_output());
    }
}
