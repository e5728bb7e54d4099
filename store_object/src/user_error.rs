//! User-facing error reporting.
//!
//! Validation never fails with `Err`; it fills an [`ErrorList`] that callers
//! render and inspect by maximum severity.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum ErrorSeverity {
    #[default]
    None,
    Info,
    Warning,
    Severe,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorSeverity::None => "none",
            ErrorSeverity::Info => "info",
            ErrorSeverity::Warning => "warning",
            ErrorSeverity::Severe => "severe",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserError {
    pub severity: ErrorSeverity,
    pub message: String,
}

impl UserError {
    pub fn new(severity: ErrorSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ErrorSeverity::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ErrorSeverity::Warning, message)
    }

    pub fn severe(message: impl Into<String>) -> Self {
        Self::new(ErrorSeverity::Severe, message)
    }
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

/// Ordered list of user errors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorList(Vec<UserError>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: impl Into<UserError>) {
        self.0.push(error.into());
    }

    pub fn add_info(&mut self, message: impl Into<String>) {
        self.push(UserError::info(message));
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.push(UserError::warning(message));
    }

    pub fn add_severe(&mut self, message: impl Into<String>) {
        self.push(UserError::severe(message));
    }

    /// Highest severity present; `None` for an empty list
    pub fn max_severity(&self) -> ErrorSeverity {
        self.0
            .iter()
            .map(|e| e.severity)
            .max()
            .unwrap_or(ErrorSeverity::None)
    }

    /// Anything above a warning blocks a save
    pub fn blocks_save(&self) -> bool {
        self.max_severity() > ErrorSeverity::Warning
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UserError> {
        self.0.iter()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a UserError;
    type IntoIter = std::slice::Iter<'a, UserError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for ErrorList {
    type Item = UserError;
    type IntoIter = std::vec::IntoIter<UserError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Extend<UserError> for ErrorList {
    fn extend<T: IntoIterator<Item = UserError>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_has_no_severity() {
        let errors = ErrorList::new();
        assert_eq!(errors.max_severity(), ErrorSeverity::None);
        assert!(!errors.blocks_save());
    }

    #[test]
    fn test_max_severity_and_blocking() {
        let mut errors = ErrorList::new();
        errors.add_info("Loaded from cache");
        errors.add_warning("Name looks unusual");
        assert_eq!(errors.max_severity(), ErrorSeverity::Warning);
        assert!(!errors.blocks_save());

        errors.add_severe("Name is required");
        assert_eq!(errors.max_severity(), ErrorSeverity::Severe);
        assert!(errors.blocks_save());
    }

    #[test]
    fn test_order_is_preserved() {
        let mut errors = ErrorList::new();
        errors.add_severe("first");
        errors.add_info("second");

        let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["first", "second"]);
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let mut errors = ErrorList::new();
        errors.add_warning("careful");

        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json[0]["severity"], "Warning");
        assert_eq!(json[0]["message"], "careful");
    }
}
