//! Abstract schema descriptions.
//!
//! A schema is an ordered list of typed fields. Field order is significant:
//! it fixes the physical column order of every table derived from it.

use crate::error::{DirectoryError, DirectoryResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Semantic value type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    /// Unbounded text
    Text,
    Integer,
    Long,
    Double,
    Boolean,
    Date,
    Binary,
}

impl FieldType {
    /// Whether values of this type are numeric identifiers.
    pub fn is_integral(&self) -> bool {
        matches!(self, Self::Integer | Self::Long)
    }
}

/// A single field of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Declared default, rendered as column DEFAULT
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Maximum length for string fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

impl Field {
    /// Create a field without default or length constraint.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            default_value: None,
            max_length: None,
        }
    }

    /// Set the declared default value.
    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    /// Set the maximum length.
    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }
}

/// A named, ordered set of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a schema from its fields, in declaration order.
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Source of schemas, looked up by name.
pub trait SchemaManager: Send + Sync {
    /// Get a schema by name, `None` if it is unknown.
    fn get_schema(&self, name: &str) -> Option<Arc<Schema>>;
}

/// In-memory schema manager.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<Schema>>>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a schema.
    pub fn register(&self, schema: Schema) {
        self.schemas
            .write()
            .insert(schema.name.clone(), Arc::new(schema));
    }

    /// Register every schema of a JSON array file.
    pub fn load_json_file(&self, path: impl AsRef<Path>) -> DirectoryResult<usize> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| DirectoryError::io(&display, e))?;
        let schemas: Vec<Schema> =
            serde_json::from_str(&content).map_err(|e| DirectoryError::io(&display, e))?;
        let count = schemas.len();
        for schema in schemas {
            self.register(schema);
        }
        Ok(count)
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    /// Check if no schema is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }
}

impl SchemaManager for SchemaRegistry {
    fn get_schema(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.read().get(name).cloned()
    }
}
