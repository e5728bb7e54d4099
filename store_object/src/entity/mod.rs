//! Entity model: identity, audit dates and mutation state.
//!
//! Every persistable type embeds an [`EntityCore`] and implements
//! [`Persistable`] by handing out that core. Field setters route through
//! [`EntityCore::assign`] (or [`EntityCore::assign_text`]) so that only a
//! real change marks the entity dirty.

pub mod validate;

use chrono::{DateTime, Utc};

use crate::id_type::EntityId;
use crate::user_error::ErrorList;

pub use validate::{
    validate_decimal_range, validate_id_required, validate_int_range, validate_length,
    EntityValidationError,
};

/// Identity, audit dates and dirty/deleted flags shared by every entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCore<I: EntityId> {
    id: I,
    create_date: DateTime<Utc>,
    modify_date: DateTime<Utc>,
    is_dirty: bool,
    is_deleted: bool,
}

impl<I: EntityId> EntityCore<I> {
    /// Core of a new, unsaved record
    pub fn new() -> Self {
        Self::loaded(I::default(), DateTime::<Utc>::UNIX_EPOCH, DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Core of a record materialized from a stored row
    pub fn loaded(id: I, create_date: DateTime<Utc>, modify_date: DateTime<Utc>) -> Self {
        Self {
            id,
            create_date,
            modify_date,
            is_dirty: false,
            is_deleted: false,
        }
    }

    pub fn id(&self) -> I {
        self.id
    }

    /// Identity changes never mark the entity dirty
    pub fn set_id(&mut self, id: I) {
        self.id = id;
    }

    pub fn create_date(&self) -> DateTime<Utc> {
        self.create_date
    }

    pub fn set_create_date(&mut self, value: DateTime<Utc>) {
        if self.create_date != value {
            self.create_date = value;
            self.is_dirty = true;
        }
    }

    pub fn modify_date(&self) -> DateTime<Utc> {
        self.modify_date
    }

    pub fn set_modify_date(&mut self, value: DateTime<Utc>) {
        if self.modify_date != value {
            self.modify_date = value;
            self.is_dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.is_dirty = dirty;
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        self.is_deleted = deleted;
    }

    pub fn is_persisted(&self) -> bool {
        !self.id.is_null()
    }

    /// Store `value` in `field`, marking the entity dirty only if it differs
    pub fn assign<T: PartialEq>(&mut self, field: &mut T, value: T) {
        if *field != value {
            *field = value;
            self.is_dirty = true;
        }
    }

    /// Text variant of [`assign`](Self::assign): absent and empty text are
    /// the same value, so grids that hand back `None` for "" do not dirty
    /// the record.
    pub fn assign_text(&mut self, field: &mut Option<String>, value: Option<String>) {
        let current = field.as_deref().unwrap_or("");
        let incoming = value.as_deref().unwrap_or("");
        if current.is_empty() && incoming.is_empty() {
            return;
        }
        if current != incoming {
            *field = value;
            self.is_dirty = true;
        }
    }
}

impl<I: EntityId> Default for EntityCore<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Something a repository can save, with identity and mutation state
pub trait Persistable {
    type Id: EntityId;

    fn core(&self) -> &EntityCore<Self::Id>;

    fn core_mut(&mut self) -> &mut EntityCore<Self::Id>;

    fn id(&self) -> Self::Id {
        self.core().id()
    }

    fn is_dirty(&self) -> bool {
        self.core().is_dirty()
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.core_mut().set_dirty(dirty);
    }

    fn is_deleted(&self) -> bool {
        self.core().is_deleted()
    }

    fn set_deleted(&mut self, deleted: bool) {
        self.core_mut().set_deleted(deleted);
    }

    fn is_persisted(&self) -> bool {
        self.core().is_persisted()
    }

    fn id_value(&self) -> i32 {
        self.core().id().value()
    }

    fn set_id_value(&mut self, value: i32) {
        self.core_mut().set_id(Self::Id::new(value));
    }

    /// Entity-specific checks; the default accepts everything
    fn validate(&self, _errors: &mut ErrorList) {}

    fn validation_errors(&self) -> ErrorList {
        let mut errors = ErrorList::new();
        self.validate(&mut errors);
        errors
    }
}
