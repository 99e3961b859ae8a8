//! Error types for SQL directories.
//!
//! This module defines all error types using `thiserror`. Construction-time
//! failures (configuration, schema, table setup) are fatal for the directory;
//! runtime failures propagate to the session caller.

use sqlx::mysql::MySqlDatabaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Configuration error in directory '{directory}': {message}")]
    Configuration { directory: String, message: String },

    #[error("Cannot connect to SQL directory '{directory}': {message}")]
    Connection {
        directory: String,
        message: String,
        /// Vendor error code reported by the driver, e.g. "12519" or "53300"
        sql_state: Option<String>,
    },

    #[error("Database error: {message}")]
    Database {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Table setup failed for '{table}': {message}")]
    Setup { table: String, message: String },

    #[error("Cannot register session cleanup in transaction for directory '{directory}': {message}")]
    Registration { directory: String, message: String },

    #[error("Session error: {message}")]
    Session { message: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Data source '{name}': {message}")]
    DataSource { name: String, message: String },

    #[error("Connection acquisition for directory '{directory}' was interrupted")]
    Interrupted { directory: String },

    #[error("I/O error on '{path}': {message}")]
    Io { path: String, message: String },
}

impl DirectoryError {
    /// Create a configuration error.
    pub fn configuration(directory: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            directory: directory.into(),
            message: message.into(),
        }
    }

    /// Create a connection error, keeping the driver's vendor code.
    pub fn connection(
        directory: impl Into<String>,
        message: impl Into<String>,
        sql_state: Option<String>,
    ) -> Self {
        Self::Connection {
            directory: directory.into(),
            message: message.into(),
            sql_state,
        }
    }

    /// Create a database error with optional vendor code.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a table setup error.
    pub fn setup(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Setup {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a transaction registration error.
    pub fn registration(directory: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Registration {
            directory: directory.into(),
            message: message.into(),
        }
    }

    /// Create a session error.
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a data source registry error.
    pub fn data_source(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataSource {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an interrupted-acquisition error.
    pub fn interrupted(directory: impl Into<String>) -> Self {
        Self::Interrupted {
            directory: directory.into(),
        }
    }

    /// Create an I/O error for a descriptor, schema or data file.
    pub fn io(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Vendor error code carried by driver-originated errors.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Connection { sql_state, .. } | Self::Database { sql_state, .. } => {
                sql_state.as_deref()
            }
            _ => None,
        }
    }

    /// Check if this error aborts directory construction.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::Setup { .. } | Self::Io { .. }
        )
    }

    /// Wrap a driver-level error as a directory connection error.
    pub fn into_connection(self, directory: &str) -> Self {
        match self {
            Self::Database { message, sql_state } => Self::connection(directory, message, sql_state),
            Self::Connection {
                message, sql_state, ..
            } => Self::connection(directory, message, sql_state),
            other => other,
        }
    }
}

/// Convert sqlx errors to DirectoryError.
impl From<sqlx::Error> for DirectoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                // MySQL reports its numeric error (1040) apart from the SQLSTATE
                let code = db_err
                    .try_downcast_ref::<MySqlDatabaseError>()
                    .map(|e| e.number().to_string())
                    .or_else(|| db_err.code().map(|c| c.to_string()));
                DirectoryError::database(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DirectoryError::database("No rows returned", None),
            sqlx::Error::PoolTimedOut => {
                DirectoryError::database("Timed out acquiring a pooled connection", None)
            }
            sqlx::Error::PoolClosed => DirectoryError::database("Connection pool is closed", None),
            sqlx::Error::Io(io_err) => DirectoryError::database(format!("I/O error: {}", io_err), None),
            sqlx::Error::Tls(tls_err) => {
                DirectoryError::database(format!("TLS error: {}", tls_err), None)
            }
            sqlx::Error::Protocol(msg) => {
                DirectoryError::database(format!("Protocol error: {}", msg), None)
            }
            sqlx::Error::Configuration(msg) => {
                DirectoryError::database(format!("Invalid connection options: {}", msg), None)
            }
            sqlx::Error::ColumnNotFound(col) => {
                DirectoryError::database(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnDecode { index, source } => DirectoryError::database(
                format!("Failed to decode column {}: {}", index, source),
                None,
            ),
            _ => DirectoryError::database(format!("Unknown database error: {}", err), None),
        }
    }
}

/// Result type alias for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DirectoryError::connection("userDirectory", "refused", None);
        assert_eq!(
            err.to_string(),
            "Cannot connect to SQL directory 'userDirectory': refused"
        );
    }

    #[test]
    fn test_sql_state_is_exposed() {
        let err = DirectoryError::database("listener refused", Some("12519".to_string()));
        assert_eq!(err.sql_state(), Some("12519"));
        assert_eq!(DirectoryError::session("closed").sql_state(), None);
    }

    #[test]
    fn test_into_connection_keeps_code() {
        let err = DirectoryError::database("too many clients", Some("53300".to_string()))
            .into_connection("groups");
        assert!(matches!(
            &err,
            DirectoryError::Connection { directory, .. } if directory == "groups"
        ));
        assert_eq!(err.sql_state(), Some("53300"));
    }

    #[test]
    fn test_into_connection_leaves_other_errors() {
        let err = DirectoryError::interrupted("groups").into_connection("other");
        assert!(matches!(err, DirectoryError::Interrupted { directory } if directory == "groups"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(DirectoryError::configuration("d", "schema not found: user").is_fatal());
        assert!(DirectoryError::setup("users", "syntax error").is_fatal());
        assert!(!DirectoryError::session("closed").is_fatal());
        assert!(!DirectoryError::connection("d", "x", None).is_fatal());
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_database() {
        let err: DirectoryError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DirectoryError::Database { .. }));
    }
}
