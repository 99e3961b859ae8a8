//! Schema to table mapping.

use crate::config::DirectoryDescriptor;
use crate::db::DatabaseType;
use crate::error::{DirectoryError, DirectoryResult};
use crate::models::{Column, ColumnType, Field, FieldType, Schema, SchemaManager, Table};
use indexmap::IndexMap;
use std::sync::Arc;

/// Table definition and field lookups derived for one directory.
#[derive(Debug, Clone)]
pub struct DirectoryMapping {
    pub schema: Arc<Schema>,
    pub table: Table,
    /// Every schema field, references included, in schema order
    pub schema_field_map: IndexMap<String, Field>,
    /// Fields backed by a column, in column order
    pub stored_field_names: Vec<String>,
}

/// Derive the physical table of a directory from its schema.
///
/// Each schema field becomes a column, in schema order, unless the descriptor
/// declares a reference on it. The id field is the primary key; with
/// `autoincrementIdField` it becomes a server-generated identity.
pub fn derive_table(
    schemas: &dyn SchemaManager,
    descriptor: &DirectoryDescriptor,
    dialect: DatabaseType,
) -> DirectoryResult<DirectoryMapping> {
    let schema = schemas.get_schema(&descriptor.schema_name).ok_or_else(|| {
        DirectoryError::configuration(
            &descriptor.name,
            format!("schema not found: {}", descriptor.schema_name),
        )
    })?;

    let physical = |name: &str| {
        if descriptor.native_case {
            name.to_string()
        } else {
            dialect.normalize_ident(name)
        }
    };

    let mut table = Table::new(descriptor.table_name(), physical(descriptor.table_name()));
    let mut schema_field_map = IndexMap::with_capacity(schema.fields.len());
    let mut stored_field_names = Vec::with_capacity(schema.fields.len());
    let mut has_id = false;

    for field in &schema.fields {
        schema_field_map.insert(field.name.clone(), field.clone());
        if descriptor.is_reference(&field.name) {
            continue;
        }

        let mut column = Column::new(
            &field.name,
            physical(&field.name),
            ColumnType::from_field(field),
            field.field_type,
        );
        column.default_value = field.default_value.clone();
        if field.name == descriptor.id_field {
            has_id = true;
            column.primary = true;
            column.nullable = false;
            if descriptor.autoincrement_id_field {
                column.column_type = ColumnType::AutoInc;
                column.field_type = FieldType::Long;
                column.identity = true;
                column.default_value = None;
            }
        }
        table.add_column(column);
        stored_field_names.push(field.name.clone());
    }

    if !has_id {
        return Err(DirectoryError::configuration(
            &descriptor.name,
            format!(
                "Directory '{}' id field '{}' is not present in schema '{}'",
                descriptor.name, descriptor.id_field, descriptor.schema_name
            ),
        ));
    }

    Ok(DirectoryMapping {
        schema,
        table,
        schema_field_map,
        stored_field_names,
    })
}
