//! Validation module
//!
//! Procedure and parameter names are spliced into SQL text, so they are
//! restricted to plain identifiers before any call is sent.

use std::fmt;

/// Validation errors for database identifiers
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Name contains invalid characters (only alphanumeric and underscore allowed)
    InvalidCharacters(String),
    /// Name is too long (PostgreSQL limit is 63 characters)
    TooLong {
        name: String,
        length: usize,
        max_length: usize,
    },
    /// Name is empty
    Empty,
    /// Name starts with invalid character (must start with letter or underscore)
    InvalidStartCharacter(String),
    /// Name is a reserved SQL keyword
    ReservedKeyword(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidCharacters(name) => {
                write!(f, "Invalid characters in name '{}': only alphanumeric characters and underscores are allowed", name)
            }
            ValidationError::TooLong {
                name,
                length,
                max_length,
            } => {
                write!(
                    f,
                    "Name '{}' is too long: {} characters (max {})",
                    name, length, max_length
                )
            }
            ValidationError::Empty => {
                write!(f, "Name cannot be empty")
            }
            ValidationError::InvalidStartCharacter(name) => {
                write!(f, "Name '{}' must start with a letter or underscore", name)
            }
            ValidationError::ReservedKeyword(name) => {
                write!(f, "Name '{}' is a reserved SQL keyword", name)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// PostgreSQL identifier length limit
const MAX_LENGTH: usize = 63;

fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Empty);
    }

    if name.len() > MAX_LENGTH {
        return Err(ValidationError::TooLong {
            name: name.to_string(),
            length: name.len(),
            max_length: MAX_LENGTH,
        });
    }

    let first_char = name.chars().next().ok_or(ValidationError::Empty)?;
    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(ValidationError::InvalidStartCharacter(name.to_string()));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidCharacters(name.to_string()));
    }

    if is_reserved_keyword(name) {
        return Err(ValidationError::ReservedKeyword(name.to_string()));
    }

    Ok(())
}

/// Statement keywords; names are always quoted, so only these are refused
fn is_reserved_keyword(name: &str) -> bool {
    const RESERVED_KEYWORDS: &[&str] = &[
        "SELECT", "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "GRANT",
        "REVOKE", "CALL", "EXECUTE", "BEGIN", "COMMIT", "ROLLBACK", "PREPARE",
    ];

    RESERVED_KEYWORDS.contains(&name.to_ascii_uppercase().as_str())
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

/// A validated, optionally schema-qualified procedure name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedProcName {
    schema: Option<String>,
    name: String,
}

impl ValidatedProcName {
    /// Validate `name`, which may be written `schema.Procedure`
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        match name.split_once('.') {
            Some((schema, proc_name)) => {
                validate_identifier(schema)?;
                validate_identifier(proc_name)?;
                Ok(Self {
                    schema: Some(schema.to_string()),
                    name: proc_name.to_string(),
                })
            }
            None => {
                validate_identifier(name)?;
                Ok(Self {
                    schema: None,
                    name: name.to_string(),
                })
            }
        }
    }

    /// Procedure name without its schema
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Quoted SQL form; `default_schema` applies when the name is unqualified
    pub fn quoted(&self, default_schema: Option<&str>) -> String {
        match self.schema.as_deref().or(default_schema) {
            Some(schema) => format!("{}.{}", quote(schema), quote(&self.name)),
            None => quote(&self.name),
        }
    }
}

impl fmt::Display for ValidatedProcName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A validated procedure parameter name, stored without the `@` sigil
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedParamName(String);

impl ValidatedParamName {
    /// Accepts `@Name` and `Name` alike
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        let bare = name.strip_prefix('@').unwrap_or(name);
        validate_identifier(bare)?;
        Ok(Self(bare.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn quoted(&self) -> String {
        quote(&self.0)
    }
}

impl fmt::Display for ValidatedParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}
