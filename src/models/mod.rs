//! Data models for SQL directories.
//!
//! This module re-exports all model types used throughout the crate.

pub mod entry;
pub mod schema;
pub mod table;
pub mod value;

// Re-export commonly used types
pub use entry::Entry;
pub use schema::{Field, FieldType, Schema, SchemaManager, SchemaRegistry};
pub use table::{Column, ColumnType, DEFAULT_VARCHAR_LENGTH, Table};
pub use value::SqlValue;
