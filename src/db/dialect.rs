//! SQL dialect handling.
//!
//! Placeholder style, identifier quoting and identifier case folding differ
//! between the supported backends. Everything that renders SQL text goes
//! through [`DatabaseType`] so the rest of the crate stays backend-neutral.

use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Resolve a configured driver name ("sqlite", "org.postgresql.Driver", ...).
    pub fn from_driver_name(driver: &str) -> Option<Self> {
        let lower = driver.to_lowercase();
        if lower.contains("postgres") {
            Some(Self::PostgreSQL)
        } else if lower.contains("mysql") || lower.contains("mariadb") {
            Some(Self::MySQL)
        } else if lower.contains("sqlite") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::PostgreSQL => format!("${}", index),
            Self::MySQL | Self::SQLite => "?".to_string(),
        }
    }

    /// Quote an identifier for use in generated SQL.
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Self::MySQL => format!("`{}`", ident.replace('`', "``")),
            Self::PostgreSQL | Self::SQLite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Fold an unquoted identifier the way the server stores it.
    ///
    /// PostgreSQL folds unquoted names to lower case; MySQL and SQLite keep
    /// the declared spelling.
    pub fn normalize_ident(&self, ident: &str) -> String {
        match self {
            Self::PostgreSQL => ident.to_lowercase(),
            Self::MySQL | Self::SQLite => ident.to_string(),
        }
    }

    /// Whether `INSERT ... RETURNING` can hand back a generated id.
    pub fn supports_returning(&self) -> bool {
        matches!(self, Self::PostgreSQL | Self::SQLite)
    }

    /// Statement opening an explicit transaction on a raw connection.
    pub fn begin_statement(&self) -> &'static str {
        match self {
            Self::MySQL => "START TRANSACTION",
            Self::PostgreSQL | Self::SQLite => "BEGIN",
        }
    }

    /// Render a SQL string literal.
    pub fn string_literal(&self, value: &str) -> String {
        let escaped = value.replace('\'', "''");
        match self {
            Self::MySQL => format!("'{}'", escaped.replace('\\', "\\\\")),
            Self::PostgreSQL | Self::SQLite => format!("'{}'", escaped),
        }
    }

    /// Render a boolean literal.
    pub fn bool_literal(&self, value: bool) -> &'static str {
        match (self, value) {
            (Self::PostgreSQL, true) => "TRUE",
            (Self::PostgreSQL, false) => "FALSE",
            (_, true) => "1",
            (_, false) => "0",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_connection_string() {
        assert_eq!(
            DatabaseType::from_connection_string("postgres://u:p@h/db"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("mariadb://h/db"),
            Some(DatabaseType::MySQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("sqlite:dir.db"),
            Some(DatabaseType::SQLite)
        );
        assert_eq!(DatabaseType::from_connection_string("oracle://h"), None);
    }

    #[test]
    fn test_from_driver_name() {
        assert_eq!(
            DatabaseType::from_driver_name("org.postgresql.Driver"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_driver_name("SQLite"),
            Some(DatabaseType::SQLite)
        );
        assert_eq!(DatabaseType::from_driver_name("h2"), None);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(DatabaseType::PostgreSQL.placeholder(3), "$3");
        assert_eq!(DatabaseType::MySQL.placeholder(3), "?");
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(DatabaseType::SQLite.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(DatabaseType::MySQL.quote_ident("user"), "`user`");
    }

    #[test]
    fn test_normalize_ident() {
        assert_eq!(DatabaseType::PostgreSQL.normalize_ident("firstName"), "firstname");
        assert_eq!(DatabaseType::SQLite.normalize_ident("firstName"), "firstName");
    }

    #[test]
    fn test_literals() {
        assert_eq!(DatabaseType::SQLite.string_literal("it's"), "'it''s'");
        assert_eq!(DatabaseType::PostgreSQL.bool_literal(true), "TRUE");
        assert_eq!(DatabaseType::MySQL.bool_literal(false), "0");
    }
}
