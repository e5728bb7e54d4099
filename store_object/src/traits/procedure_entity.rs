use std::fmt;

use crate::command::{FromDataRow, ProcedureCall};
use crate::entity::Persistable;
use crate::errors::StoreError;

/// The four convention procedures of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcedureKind {
    Get,
    Insert,
    Update,
    Delete,
}

impl ProcedureKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ProcedureKind::Get => "Get",
            ProcedureKind::Insert => "Insert",
            ProcedureKind::Update => "Update",
            ProcedureKind::Delete => "Delete",
        }
    }
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Hooks a concrete entity supplies to the generic repository: its
/// procedure-name stem, how a raw row becomes an entity, and how its fields
/// bind to insert and update calls.
///
/// ```rust
/// use store_object::prelude::*;
///
/// store_object::entity_id!(pub CustomerId);
///
/// #[derive(Debug, Default)]
/// pub struct Customer {
///     core: EntityCore<CustomerId>,
///     name: Option<String>,
/// }
///
/// impl Persistable for Customer {
///     type Id = CustomerId;
///     fn core(&self) -> &EntityCore<CustomerId> { &self.core }
///     fn core_mut(&mut self) -> &mut EntityCore<CustomerId> { &mut self.core }
/// }
///
/// impl ProcedureEntity for Customer {
///     type Row = DataRow;
///
///     fn entity_name() -> &'static str {
///         "Customer"
///     }
///
///     fn create_entity(row: DataRow) -> Result<Self, StoreError> {
///         Ok(Customer {
///             core: EntityCore::loaded(
///                 row.get_id("CustomerId")?,
///                 row.get_datetime("CreateDate")?,
///                 row.get_datetime("ModifyDate")?,
///             ),
///             name: row.get_opt_string("Name")?,
///         })
///     }
///
///     fn add_insert_update_params(&self, call: &mut ProcedureCall) {
///         add_param_varchar(call, "@Name", self.name.as_deref());
///     }
/// }
///
/// assert_eq!(Customer::procedure_name(ProcedureKind::Get), "GetCustomer");
/// assert_eq!(Customer::entity_id_param(), "@CustomerId");
/// ```
pub trait ProcedureEntity: Persistable + Sized + Send + Sync + 'static {
    /// The raw row type decoded from a result row
    type Row: FromDataRow + Send;

    /// Procedure-name stem, e.g. `Order` for `GetOrder`
    fn entity_name() -> &'static str;

    fn entity_id_param() -> String {
        format!("@{}Id", Self::entity_name())
    }

    fn procedure_name(kind: ProcedureKind) -> String {
        format!("{}{}", kind.prefix(), Self::entity_name())
    }

    fn create_entity(row: Self::Row) -> Result<Self, StoreError>;

    /// Bind every field, in the procedure's declared order, excluding the
    /// identity
    fn add_insert_update_params(&self, call: &mut ProcedureCall);
}
