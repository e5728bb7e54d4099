//! Stored-procedure calls and result rows.
//!
//! A [`ProcedureCall`] is the backend-neutral form of one invocation: a
//! procedure name plus parameters in the order they were bound. Backends
//! render it to their own wire form and hand results back as [`DataRow`]s.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use type_mapping::{is_compatible, ParameterDirection, SqlType, SqlValue};

use crate::errors::StoreError;
use crate::id_type::EntityId;
use crate::validation::{ValidatedParamName, ValidatedProcName};

fn bare_name(name: &str) -> &str {
    name.strip_prefix('@').unwrap_or(name)
}

/// One bound parameter. The name is kept without the `@` sigil.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParameter {
    name: String,
    sql_type: SqlType,
    direction: ParameterDirection,
    value: SqlValue,
}

impl SqlParameter {
    pub fn new(
        name: &str,
        sql_type: SqlType,
        direction: ParameterDirection,
        value: SqlValue,
    ) -> Self {
        Self {
            name: bare_name(name).to_string(),
            sql_type,
            direction,
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    pub fn direction(&self) -> ParameterDirection {
        self.direction
    }

    pub fn value(&self) -> &SqlValue {
        &self.value
    }

    pub fn set_value(&mut self, value: SqlValue) {
        self.value = value;
    }

    fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(bare_name(name))
    }
}

/// A stored-procedure invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureCall {
    procedure: String,
    parameters: Vec<SqlParameter>,
}

impl ProcedureCall {
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            parameters: Vec::new(),
        }
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Parameters in binding order
    pub fn parameters(&self) -> &[SqlParameter] {
        &self.parameters
    }

    pub fn add_parameter(&mut self, parameter: SqlParameter) {
        self.parameters.push(parameter);
    }

    pub fn add_input(&mut self, name: &str, sql_type: SqlType, value: impl Into<SqlValue>) {
        self.add_parameter(SqlParameter::new(
            name,
            sql_type,
            ParameterDirection::Input,
            value.into(),
        ));
    }

    pub fn add_output(&mut self, name: &str, sql_type: SqlType) {
        self.add_parameter(SqlParameter::new(
            name,
            sql_type,
            ParameterDirection::Output,
            SqlValue::Null,
        ));
    }

    /// Case-insensitive lookup; `@Name` and `Name` are the same parameter
    pub fn parameter(&self, name: &str) -> Option<&SqlParameter> {
        self.parameters.iter().find(|p| p.matches(name))
    }

    /// Value of an output parameter after execution; `None` if no such
    /// output parameter was bound
    pub fn output_value(&self, name: &str) -> Option<&SqlValue> {
        self.parameter(name)
            .filter(|p| p.direction.is_output())
            .map(|p| &p.value)
    }

    /// Store a value returned by the backend into an output parameter
    pub fn set_output(&mut self, name: &str, value: SqlValue) -> bool {
        match self
            .parameters
            .iter_mut()
            .find(|p| p.direction.is_output() && p.matches(name))
        {
            Some(parameter) => {
                parameter.value = value;
                true
            }
            None => false,
        }
    }

    /// Check identifiers and declared types before anything reaches a backend
    pub fn validate(&self) -> Result<ValidatedProcName, StoreError> {
        let procedure = ValidatedProcName::new(&self.procedure)?;
        for parameter in &self.parameters {
            ValidatedParamName::new(&parameter.name)?;
            if parameter.direction.is_input() && !is_compatible(parameter.sql_type, &parameter.value)
            {
                return Err(StoreError::TypeMismatch {
                    procedure: self.procedure.clone(),
                    parameter: parameter.name.clone(),
                    declared: parameter.sql_type,
                    value: parameter.value.to_string(),
                });
            }
        }
        Ok(procedure)
    }
}

/// One result row: ordered (column, value) pairs with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataRow {
    columns: Vec<(String, SqlValue)>,
}

fn type_label(value: &SqlValue) -> String {
    value
        .sql_type()
        .map_or_else(|| "NULL".to_string(), |t| t.to_string())
}

impl DataRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Builder form of [`set`](Self::set)
    pub fn with(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.set(column, value.into());
        self
    }

    pub fn push(&mut self, column: &str, value: SqlValue) {
        self.columns.push((column.to_string(), value));
    }

    /// Replace the value of an existing column or append a new one
    pub fn set(&mut self, column: &str, value: SqlValue) {
        match self
            .columns
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
        {
            Some((_, existing)) => *existing = value,
            None => self.push(column, value),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn value(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    pub fn get(&self, column: &str) -> Result<&SqlValue, StoreError> {
        self.value(column).ok_or_else(|| StoreError::MissingColumn {
            column: column.to_string(),
        })
    }

    fn typed<T>(
        &self,
        column: &str,
        expected: SqlType,
        convert: impl Fn(&SqlValue) -> Option<T>,
    ) -> Result<Option<T>, StoreError> {
        let value = self.get(column)?;
        if value.is_null() {
            return Ok(None);
        }
        convert(value).map(Some).ok_or_else(|| StoreError::ColumnType {
            column: column.to_string(),
            expected,
            found: type_label(value),
        })
    }

    fn required<T>(&self, column: &str, expected: SqlType, value: Option<T>) -> Result<T, StoreError> {
        value.ok_or_else(|| StoreError::ColumnType {
            column: column.to_string(),
            expected,
            found: "NULL".to_string(),
        })
    }

    pub fn get_opt_i32(&self, column: &str) -> Result<Option<i32>, StoreError> {
        self.typed(column, SqlType::Int, SqlValue::as_i32)
    }

    pub fn get_i32(&self, column: &str) -> Result<i32, StoreError> {
        let value = self.get_opt_i32(column)?;
        self.required(column, SqlType::Int, value)
    }

    pub fn get_u8(&self, column: &str) -> Result<u8, StoreError> {
        let value = self.typed(column, SqlType::TinyInt, SqlValue::as_u8)?;
        self.required(column, SqlType::TinyInt, value)
    }

    /// Booleans are stored as 1-byte integers
    pub fn get_bool(&self, column: &str) -> Result<bool, StoreError> {
        Ok(self.get_u8(column)? != 0)
    }

    pub fn get_opt_string(&self, column: &str) -> Result<Option<String>, StoreError> {
        self.typed(column, SqlType::VarChar, |v| v.as_str().map(str::to_string))
    }

    pub fn get_string(&self, column: &str) -> Result<String, StoreError> {
        let value = self.get_opt_string(column)?;
        self.required(column, SqlType::VarChar, value)
    }

    pub fn get_opt_decimal(&self, column: &str) -> Result<Option<Decimal>, StoreError> {
        self.typed(column, SqlType::Money, SqlValue::as_decimal)
    }

    pub fn get_decimal(&self, column: &str) -> Result<Decimal, StoreError> {
        let value = self.get_opt_decimal(column)?;
        self.required(column, SqlType::Money, value)
    }

    pub fn get_opt_datetime(&self, column: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.typed(column, SqlType::DateTime, SqlValue::as_datetime)
    }

    pub fn get_datetime(&self, column: &str) -> Result<DateTime<Utc>, StoreError> {
        let value = self.get_opt_datetime(column)?;
        self.required(column, SqlType::DateTime, value)
    }

    /// NULL reads back as the null identity
    pub fn get_id<I: EntityId>(&self, column: &str) -> Result<I, StoreError> {
        Ok(I::new(self.get_opt_i32(column)?.unwrap_or(0)))
    }
}

/// Decode a typed raw row from a result row
pub trait FromDataRow: Sized {
    fn from_data_row(row: &DataRow) -> Result<Self, StoreError>;
}

impl FromDataRow for DataRow {
    fn from_data_row(row: &DataRow) -> Result<Self, StoreError> {
        Ok(row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::entity_id!(OrderId);

    #[test]
    fn test_parameter_lookup_ignores_sigil_and_case() {
        let mut call = ProcedureCall::new("InsertOrder");
        call.add_output("@OrderId", SqlType::Int);
        call.add_input("@Name", SqlType::VarChar, "Acme");

        assert_eq!(call.parameters()[0].name(), "OrderId");
        assert!(call.parameter("orderid").is_some());
        assert_eq!(call.output_value("@OrderId"), Some(&SqlValue::Null));
        // Inputs are not readable as outputs
        assert_eq!(call.output_value("@Name"), None);

        assert!(call.set_output("OrderId", SqlValue::Int(9)));
        assert!(!call.set_output("Name", SqlValue::Int(9)));
        assert_eq!(call.output_value("OrderId"), Some(&SqlValue::Int(9)));
    }

    #[test]
    fn test_validate_rejects_bad_identifiers() {
        let call = ProcedureCall::new("GetOrder; DROP TABLE Orders");
        assert!(matches!(
            call.validate(),
            Err(StoreError::InvalidIdentifier(_))
        ));

        let mut call = ProcedureCall::new("GetOrder");
        call.add_input("@Order Id", SqlType::Int, 1);
        assert!(matches!(
            call.validate(),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_validate_rejects_type_mismatch() {
        let mut call = ProcedureCall::new("dbo.GetOrder");
        call.add_input("@OrderId", SqlType::Int, "seven");

        match call.validate() {
            Err(StoreError::TypeMismatch {
                parameter, declared, ..
            }) => {
                assert_eq!(parameter, "OrderId");
                assert_eq!(declared, SqlType::Int);
            }
            other => panic!("Expected TypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_row_getters() {
        let now = Utc::now();
        let row = DataRow::new()
            .with("OrderId", 12)
            .with("Name", "Acme")
            .with("IsActive", true)
            .with("Total", Decimal::new(1999, 2))
            .with("ShipDate", SqlValue::Null)
            .with("CreateDate", now);

        assert_eq!(row.get_id::<OrderId>("orderid").unwrap(), OrderId::new(12));
        assert_eq!(row.get_string("NAME").unwrap(), "Acme");
        assert!(row.get_bool("IsActive").unwrap());
        assert_eq!(row.get_decimal("Total").unwrap(), Decimal::new(1999, 2));
        assert_eq!(row.get_opt_datetime("ShipDate").unwrap(), None);
        assert_eq!(row.get_datetime("CreateDate").unwrap(), now);
    }

    #[test]
    fn test_row_getter_errors() {
        let row = DataRow::new().with("Name", "Acme").with("Note", SqlValue::Null);

        assert!(matches!(
            row.get_i32("Missing"),
            Err(StoreError::MissingColumn { column }) if column == "Missing"
        ));
        assert!(matches!(
            row.get_i32("Name"),
            Err(StoreError::ColumnType { expected: SqlType::Int, .. })
        ));
        assert!(matches!(
            row.get_string("Note"),
            Err(StoreError::ColumnType { found, .. }) if found == "NULL"
        ));
        assert_eq!(row.get_opt_string("Note").unwrap(), None);
    }

    #[test]
    fn test_set_replaces_existing_column() {
        let mut row = DataRow::new().with("Name", "Acme");
        row.set("name", SqlValue::from("Globex"));
        assert_eq!(row.len(), 1);
        assert_eq!(row.get_string("Name").unwrap(), "Globex");
    }
}
