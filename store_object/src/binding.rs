//! Parameter binding helpers.
//!
//! Each function appends exactly one parameter, typed by the declared wire
//! type rather than the Rust type of the entity field. Repositories call
//! them in the procedure's declared parameter order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use type_mapping::{SqlType, SqlValue};

use crate::command::ProcedureCall;
use crate::id_type::EntityId;

/// Identity input; the null identity (0) binds as SQL NULL
pub fn add_param_input_id<I: EntityId>(call: &mut ProcedureCall, name: &str, id: I) {
    let value = if id.is_null() {
        SqlValue::Null
    } else {
        SqlValue::Int(id.value())
    };
    call.add_input(name, SqlType::Int, value);
}

/// Output identity filled in by an insert procedure
pub fn add_param_output_id(call: &mut ProcedureCall, name: &str) {
    call.add_output(name, SqlType::Int);
}

pub fn add_param_output_int(call: &mut ProcedureCall, name: &str) {
    call.add_output(name, SqlType::Int);
}

/// Absent text is sent as an empty string, never as NULL
pub fn add_param_varchar(call: &mut ProcedureCall, name: &str, value: Option<&str>) {
    call.add_input(name, SqlType::VarChar, value.unwrap_or(""));
}

pub fn add_param_int(call: &mut ProcedureCall, name: &str, value: i32) {
    call.add_input(name, SqlType::Int, value);
}

pub fn add_param_tinyint(call: &mut ProcedureCall, name: &str, value: u8) {
    call.add_input(name, SqlType::TinyInt, value);
}

/// Booleans travel as a 1-byte integer (0/1)
pub fn add_param_bool(call: &mut ProcedureCall, name: &str, value: bool) {
    call.add_input(name, SqlType::TinyInt, value);
}

pub fn add_param_money(call: &mut ProcedureCall, name: &str, value: Decimal) {
    call.add_input(name, SqlType::Money, value);
}

pub fn add_param_datetime(call: &mut ProcedureCall, name: &str, value: DateTime<Utc>) {
    call.add_input(name, SqlType::DateTime, value);
}

/// An absent date binds as SQL NULL
pub fn add_param_opt_datetime(call: &mut ProcedureCall, name: &str, value: Option<DateTime<Utc>>) {
    call.add_input(name, SqlType::DateTime, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use type_mapping::ParameterDirection;

    crate::entity_id!(ParentId);

    #[test]
    fn test_null_identity_binds_null() {
        let mut call = ProcedureCall::new("UpdateFolder");
        add_param_input_id(&mut call, "@ParentId", ParentId::default());
        add_param_input_id(&mut call, "@OwnerId", ParentId::new(4));

        let params = call.parameters();
        assert_eq!(params[0].value(), &SqlValue::Null);
        assert_eq!(params[0].sql_type(), SqlType::Int);
        assert_eq!(params[1].value(), &SqlValue::Int(4));
    }

    #[test]
    fn test_absent_text_binds_empty_string() {
        let mut call = ProcedureCall::new("InsertVendor");
        add_param_varchar(&mut call, "@Notes", None);
        assert_eq!(call.parameters()[0].value(), &SqlValue::VarChar(String::new()));
    }

    #[test]
    fn test_bool_binds_as_tinyint() {
        let mut call = ProcedureCall::new("InsertVendor");
        add_param_bool(&mut call, "@IsActive", true);
        add_param_bool(&mut call, "@IsArchived", false);

        assert_eq!(call.parameters()[0].sql_type(), SqlType::TinyInt);
        assert_eq!(call.parameters()[0].value(), &SqlValue::TinyInt(1));
        assert_eq!(call.parameters()[1].value(), &SqlValue::TinyInt(0));
    }

    #[test]
    fn test_optional_date() {
        let now = Utc::now();
        let mut call = ProcedureCall::new("UpdateOrder");
        add_param_opt_datetime(&mut call, "@ShipDate", None);
        add_param_opt_datetime(&mut call, "@DueDate", Some(now));

        assert_eq!(call.parameters()[0].value(), &SqlValue::Null);
        assert_eq!(call.parameters()[1].value(), &SqlValue::DateTime(now));
    }

    #[test]
    fn test_each_helper_appends_one_parameter_in_order() {
        let mut call = ProcedureCall::new("InsertOrder");
        add_param_output_id(&mut call, "@OrderId");
        add_param_varchar(&mut call, "@Name", Some("Acme"));
        add_param_int(&mut call, "@Quantity", 3);
        add_param_tinyint(&mut call, "@Priority", 2);
        add_param_money(&mut call, "@Total", Decimal::new(1050, 2));
        add_param_datetime(&mut call, "@OrderDate", Utc::now());

        let names: Vec<_> = call.parameters().iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            ["OrderId", "Name", "Quantity", "Priority", "Total", "OrderDate"]
        );
        assert_eq!(call.parameters()[0].direction(), ParameterDirection::Output);
        assert!(call.validate().is_ok());
    }
}
