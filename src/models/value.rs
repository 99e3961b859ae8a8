//! Bindable SQL values.
//!
//! Entry fields travel as JSON values; [`SqlValue`] is their typed form once
//! the target field type is known.

use crate::error::{DirectoryError, DirectoryResult};
use crate::models::FieldType;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// A parameter value for generated statements.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Point in time
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
        }
    }

    /// Convert a JSON value to the SQL value of a field type.
    pub fn from_json(field: &str, field_type: FieldType, value: &JsonValue) -> DirectoryResult<Self> {
        if value.is_null() {
            return Ok(Self::Null);
        }
        let invalid = || {
            DirectoryError::session(format!(
                "Invalid value for field '{}' of type {:?}: {}",
                field, field_type, value
            ))
        };
        match field_type {
            FieldType::String | FieldType::Text => Ok(Self::String(match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })),
            FieldType::Integer | FieldType::Long => match value {
                JsonValue::Number(n) => n.as_i64().map(Self::Int).ok_or_else(invalid),
                JsonValue::String(s) => s.trim().parse().map(Self::Int).map_err(|_| invalid()),
                _ => Err(invalid()),
            },
            FieldType::Double => match value {
                JsonValue::Number(n) => n.as_f64().map(Self::Float).ok_or_else(invalid),
                JsonValue::String(s) => s.trim().parse().map(Self::Float).map_err(|_| invalid()),
                _ => Err(invalid()),
            },
            FieldType::Boolean => match value {
                JsonValue::Bool(b) => Ok(Self::Bool(*b)),
                JsonValue::Number(n) => Ok(Self::Bool(n.as_i64().unwrap_or(0) != 0)),
                JsonValue::String(s) if s.eq_ignore_ascii_case("true") => Ok(Self::Bool(true)),
                JsonValue::String(s) if s.eq_ignore_ascii_case("false") => Ok(Self::Bool(false)),
                _ => Err(invalid()),
            },
            FieldType::Date => match value {
                JsonValue::String(s) => DateTime::parse_from_rfc3339(s)
                    .map(|d| Self::Timestamp(d.with_timezone(&Utc)))
                    .map_err(|_| invalid()),
                _ => Err(invalid()),
            },
            FieldType::Binary => match value {
                JsonValue::String(s) => STANDARD.decode(s).map(Self::Bytes).map_err(|_| invalid()),
                _ => Err(invalid()),
            },
        }
    }

    /// Convert a textual value (data files, ids) to the SQL value of a field type.
    pub fn from_text(field: &str, field_type: FieldType, text: &str) -> DirectoryResult<Self> {
        match field_type {
            FieldType::String | FieldType::Text => Ok(Self::String(text.to_string())),
            _ => Self::from_json(field, field_type, &JsonValue::String(text.to_string())),
        }
    }
}
