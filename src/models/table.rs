//! Physical table definitions.
//!
//! A [`Table`] is derived once from a schema and then shared read-only by the
//! directory and all its sessions. Column order is the schema field order and
//! is part of the persisted contract.

use crate::db::DatabaseType;
use crate::models::{Field, FieldType};

/// Default length of bounded string columns.
pub const DEFAULT_VARCHAR_LENGTH: u32 = 255;

/// Physical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Varchar(u32),
    Clob,
    Integer,
    Long,
    Double,
    Boolean,
    Timestamp,
    Blob,
    /// Server-generated identity column
    AutoInc,
}

impl ColumnType {
    /// Map a schema field to its column type.
    pub fn from_field(field: &Field) -> Self {
        match field.field_type {
            FieldType::String => Self::Varchar(field.max_length.unwrap_or(DEFAULT_VARCHAR_LENGTH)),
            FieldType::Text => Self::Clob,
            FieldType::Integer => Self::Integer,
            FieldType::Long => Self::Long,
            FieldType::Double => Self::Double,
            FieldType::Boolean => Self::Boolean,
            FieldType::Date => Self::Timestamp,
            FieldType::Binary => Self::Blob,
        }
    }

    /// Render the column type for a dialect.
    pub fn sql_type(&self, dialect: DatabaseType) -> String {
        match (self, dialect) {
            (Self::Varchar(len), _) => format!("VARCHAR({})", len),
            (Self::Clob, DatabaseType::MySQL) => "LONGTEXT".to_string(),
            (Self::Clob, _) => "TEXT".to_string(),
            (Self::Integer, _) => "INTEGER".to_string(),
            (Self::Long, _) => "BIGINT".to_string(),
            (Self::Double, DatabaseType::PostgreSQL) => "DOUBLE PRECISION".to_string(),
            (Self::Double, _) => "DOUBLE".to_string(),
            (Self::Boolean, _) => "BOOLEAN".to_string(),
            (Self::Timestamp, DatabaseType::PostgreSQL) => "TIMESTAMP WITH TIME ZONE".to_string(),
            (Self::Timestamp, _) => "DATETIME".to_string(),
            (Self::Blob, DatabaseType::PostgreSQL) => "BYTEA".to_string(),
            (Self::Blob, DatabaseType::MySQL) => "LONGBLOB".to_string(),
            (Self::Blob, DatabaseType::SQLite) => "BLOB".to_string(),
            (Self::AutoInc, DatabaseType::PostgreSQL) => "BIGSERIAL".to_string(),
            (Self::AutoInc, DatabaseType::MySQL) => "BIGINT AUTO_INCREMENT".to_string(),
            (Self::AutoInc, DatabaseType::SQLite) => "INTEGER".to_string(),
        }
    }
}

/// A column of a directory table.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Logical field name
    pub key: String,
    /// Physical column name
    pub name: String,
    pub column_type: ColumnType,
    /// Value type used to bind and decode this column
    pub field_type: FieldType,
    pub nullable: bool,
    pub primary: bool,
    pub identity: bool,
    pub default_value: Option<String>,
}

impl Column {
    /// Create a nullable, non-key column.
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        column_type: ColumnType,
        field_type: FieldType,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            column_type,
            field_type,
            nullable: true,
            primary: false,
            identity: false,
            default_value: None,
        }
    }

    /// Render the column definition used in CREATE / ALTER statements.
    ///
    /// With `inline_primary`, SQLite identity columns carry their own
    /// `PRIMARY KEY AUTOINCREMENT` clause.
    pub fn definition_sql(&self, dialect: DatabaseType, inline_primary: bool) -> String {
        let mut sql = format!(
            "{} {}",
            dialect.quote_ident(&self.name),
            self.column_type.sql_type(dialect)
        );
        if inline_primary {
            sql.push_str(" PRIMARY KEY AUTOINCREMENT");
        }
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(&self.default_literal(default, dialect));
        }
        sql
    }

    fn default_literal(&self, value: &str, dialect: DatabaseType) -> String {
        match self.field_type {
            FieldType::Integer | FieldType::Long if value.trim().parse::<i64>().is_ok() => {
                value.trim().to_string()
            }
            FieldType::Double if value.trim().parse::<f64>().is_ok() => value.trim().to_string(),
            FieldType::Boolean if value.eq_ignore_ascii_case("true") => {
                dialect.bool_literal(true).to_string()
            }
            FieldType::Boolean if value.eq_ignore_ascii_case("false") => {
                dialect.bool_literal(false).to_string()
            }
            _ => dialect.string_literal(value),
        }
    }

    fn is_sqlite_identity(&self, dialect: DatabaseType) -> bool {
        dialect == DatabaseType::SQLite && self.identity && self.primary
    }
}

/// A directory table: physical name plus ordered columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Logical table name from the descriptor
    pub key: String,
    /// Physical table name
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    /// Create a table without columns.
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Append a column and return it for further adjustment.
    pub fn add_column(&mut self, column: Column) -> &mut Column {
        self.columns.push(column);
        let last = self.columns.len() - 1;
        &mut self.columns[last]
    }

    /// Look up a column by logical field name.
    pub fn column(&self, key: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.key == key)
    }

    /// Look up a column by physical name, ignoring case.
    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// The primary key column.
    pub fn primary_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary)
    }

    /// Render CREATE TABLE for a dialect.
    pub fn create_sql(&self, dialect: DatabaseType) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.definition_sql(dialect, c.is_sqlite_identity(dialect)))
            .collect();

        let inline_pk = self.columns.iter().any(|c| c.is_sqlite_identity(dialect));
        let pk: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.primary)
            .map(|c| dialect.quote_ident(&c.name))
            .collect();
        if !inline_pk && !pk.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        }

        format!(
            "CREATE TABLE {} ({})",
            dialect.quote_ident(&self.name),
            parts.join(", ")
        )
    }

    /// Render DROP TABLE for a dialect.
    pub fn drop_sql(&self, dialect: DatabaseType) -> String {
        format!("DROP TABLE {}", dialect.quote_ident(&self.name))
    }

    /// Render ALTER TABLE ... ADD COLUMN for one column.
    pub fn add_column_sql(&self, column: &Column, dialect: DatabaseType) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            dialect.quote_ident(&self.name),
            column.definition_sql(dialect, false)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_table() -> Table {
        let mut table = Table::new("users", "users");
        let id = table.add_column(Column::new(
            "username",
            "username",
            ColumnType::Varchar(255),
            FieldType::String,
        ));
        id.primary = true;
        id.nullable = false;
        table
            .add_column(Column::new(
                "quota",
                "quota",
                ColumnType::Integer,
                FieldType::Integer,
            ))
            .default_value = Some("10".to_string());
        table
    }

    #[test]
    fn test_create_sql_sqlite() {
        assert_eq!(
            user_table().create_sql(DatabaseType::SQLite),
            "CREATE TABLE \"users\" (\"username\" VARCHAR(255) NOT NULL, \"quota\" INTEGER DEFAULT 10, PRIMARY KEY (\"username\"))"
        );
    }

    #[test]
    fn test_create_sql_mysql_quotes_with_backticks() {
        let sql = user_table().create_sql(DatabaseType::MySQL);
        assert!(sql.starts_with("CREATE TABLE `users`"));
        assert!(sql.ends_with("PRIMARY KEY (`username`))"));
    }

    #[test]
    fn test_sqlite_identity_is_inline() {
        let mut table = Table::new("groups", "groups");
        let id = table.add_column(Column::new("id", "id", ColumnType::AutoInc, FieldType::Long));
        id.primary = true;
        id.identity = true;
        id.nullable = false;
        assert_eq!(
            table.create_sql(DatabaseType::SQLite),
            "CREATE TABLE \"groups\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL)"
        );
        assert_eq!(
            table.create_sql(DatabaseType::PostgreSQL),
            "CREATE TABLE \"groups\" (\"id\" BIGSERIAL NOT NULL, PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn test_string_default_is_quoted() {
        let mut column = Column::new("lang", "lang", ColumnType::Varchar(8), FieldType::String);
        column.default_value = Some("en".to_string());
        assert_eq!(
            column.definition_sql(DatabaseType::PostgreSQL, false),
            "\"lang\" VARCHAR(8) DEFAULT 'en'"
        );
    }

    #[test]
    fn test_boolean_default_uses_dialect_literal() {
        let mut column = Column::new("active", "active", ColumnType::Boolean, FieldType::Boolean);
        column.default_value = Some("true".to_string());
        assert_eq!(
            column.definition_sql(DatabaseType::SQLite, false),
            "\"active\" BOOLEAN DEFAULT 1"
        );
    }

    #[test]
    fn test_column_lookup() {
        let table = user_table();
        assert_eq!(table.primary_column().map(|c| c.key.as_str()), Some("username"));
        assert!(table.column("quota").is_some());
        assert!(table.column_by_name("QUOTA").is_some());
        assert!(table.column("tenantId").is_none());
    }

    #[test]
    fn test_add_column_sql() {
        let table = user_table();
        let column = table.column("quota").unwrap();
        assert_eq!(
            table.add_column_sql(column, DatabaseType::SQLite),
            "ALTER TABLE \"users\" ADD COLUMN \"quota\" INTEGER DEFAULT 10"
        );
    }
}
