//! Directory entries.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One record of a directory, keyed by its id field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    /// Stored field values in schema order
    pub fields: IndexMap<String, JsonValue>,
}

impl Entry {
    /// Create an entry from its id and field values.
    pub fn new(id: impl Into<String>, fields: IndexMap<String, JsonValue>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    /// Get a field value as a string slice.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(JsonValue::as_str)
    }

    /// Set a field value.
    pub fn set(&mut self, field: impl Into<String>, value: JsonValue) {
        self.fields.insert(field.into(), value);
    }
}

/// Render a JSON id value as an entry id.
pub(crate) fn id_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_accessors() {
        let mut entry = Entry::new("jdoe", IndexMap::new());
        entry.set("email", json!("jdoe@example.com"));
        assert_eq!(entry.get_str("email"), Some("jdoe@example.com"));
        assert!(entry.get("missing").is_none());
    }

    #[test]
    fn test_id_to_string() {
        assert_eq!(id_to_string(&json!(12)), Some("12".to_string()));
        assert_eq!(id_to_string(&json!("a")), Some("a".to_string()));
        assert_eq!(id_to_string(&JsonValue::Null), None);
    }
}
