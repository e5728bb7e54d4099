//! Standard field validators.
//!
//! Each validator appends at most one severe [`UserError`] to the list and
//! never fails with `Err`.

use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::id_type::EntityId;
use crate::user_error::{ErrorList, UserError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityValidationError {
    #[error("{property} must be between {min} and {max} characters")]
    Length {
        property: String,
        min: usize,
        max: usize,
    },

    #[error("{property} is required")]
    IdRequired { property: String },

    #[error("{property} must be an integer between {min} and {max}")]
    IntRange { property: String, min: i32, max: i32 },

    #[error("{property} must be a decimal between {min} and {max}")]
    DecimalRange {
        property: String,
        min: Decimal,
        max: Decimal,
    },

    #[error("{property} may have at most {places} decimal places")]
    DecimalPlaces { property: String, places: u32 },
}

impl From<EntityValidationError> for UserError {
    fn from(error: EntityValidationError) -> Self {
        UserError::severe(error.to_string())
    }
}

/// Absent text counts as length zero
pub fn validate_length(
    value: Option<&str>,
    errors: &mut ErrorList,
    min_length: usize,
    max_length: usize,
    property: &str,
) {
    let length = value.map_or(0, |v| v.chars().count());
    if length < min_length || length > max_length {
        errors.push(EntityValidationError::Length {
            property: property.to_string(),
            min: min_length,
            max: max_length,
        });
    }
}

pub fn validate_id_required<I: EntityId>(id: I, errors: &mut ErrorList, property: &str) {
    if id.is_null() {
        errors.push(EntityValidationError::IdRequired {
            property: property.to_string(),
        });
    }
}

/// Validate user-entered text as an integer within `[min_value, max_value]`
pub fn validate_int_range(
    text: &str,
    min_value: i32,
    max_value: i32,
    errors: &mut ErrorList,
    property: &str,
) {
    let in_range = text
        .trim()
        .parse::<i32>()
        .is_ok_and(|value| value >= min_value && value <= max_value);
    if !in_range {
        errors.push(EntityValidationError::IntRange {
            property: property.to_string(),
            min: min_value,
            max: max_value,
        });
    }
}

/// Validate user-entered text as a decimal within `[min_value, max_value]`
/// carrying no more than `max_places` fractional digits. Precision is checked
/// first: the value scaled by 10^max_places must already be whole.
pub fn validate_decimal_range(
    text: &str,
    min_value: Decimal,
    max_value: Decimal,
    max_places: u32,
    errors: &mut ErrorList,
    property: &str,
) {
    let range_error = || EntityValidationError::DecimalRange {
        property: property.to_string(),
        min: min_value,
        max: max_value,
    };

    let Ok(value) = Decimal::from_str(text.trim()) else {
        errors.push(range_error());
        return;
    };

    let scaled = (0..max_places).try_fold(value, |acc, _| acc.checked_mul(Decimal::TEN));
    match scaled {
        Some(scaled) if scaled != scaled.trunc() => {
            errors.push(EntityValidationError::DecimalPlaces {
                property: property.to_string(),
                places: max_places,
            });
        }
        Some(_) if value >= min_value && value <= max_value => {}
        _ => errors.push(range_error()),
    }
}
