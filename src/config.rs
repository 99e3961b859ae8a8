//! Configuration handling for SQL directories.
//!
//! Directories are described by JSON descriptors; named data sources come
//! from the descriptor file or from CLI arguments in `name=url` form.

use crate::db::RetryPolicy;
use crate::db::retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_OVERLOAD_CODES};
use crate::error::{DirectoryError, DirectoryResult};
use clap::Parser;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_DATA_FILE_SEPARATOR: char = ',';

/// Connection pool configuration options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if min == 0 {
                return Err("min_connections must be greater than 0".to_string());
            }
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// What table setup may do at directory construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CreateTablePolicy {
    /// Use the table as it is
    #[default]
    Never,
    /// Create the table if absent, add columns it lacks
    OnMissingColumns,
    /// Drop and recreate the table
    Always,
}

/// Retry settings for connection acquisition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOptions {
    /// Attempts before giving up (default: 5)
    pub max_attempts: Option<u32>,
    /// Vendor codes treated as "server overloaded"
    pub overload_codes: Option<Vec<String>>,
}

impl RetryOptions {
    /// Build the retry policy, filling in defaults.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            self.overload_codes.clone().unwrap_or_else(|| {
                DEFAULT_OVERLOAD_CODES.iter().map(|c| c.to_string()).collect()
            }),
        )
    }
}

/// A field resolved through another directory instead of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReferenceDescriptor {
    /// Mirror of a reference declared on the target directory
    #[serde(rename_all = "camelCase")]
    InverseReference {
        field_name: String,
        directory: String,
        dual_reference_field: String,
    },
    /// Many-to-many link stored in a join table
    #[serde(rename_all = "camelCase")]
    TableReference {
        field_name: String,
        directory: String,
        table: String,
        source_column: String,
        target_column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_file: Option<PathBuf>,
    },
}

impl ReferenceDescriptor {
    /// Name of the schema field this reference backs.
    pub fn field_name(&self) -> &str {
        match self {
            Self::InverseReference { field_name, .. } | Self::TableReference { field_name, .. } => {
                field_name
            }
        }
    }

    /// Directory the reference points to.
    pub fn target_directory(&self) -> &str {
        match self {
            Self::InverseReference { directory, .. } | Self::TableReference { directory, .. } => {
                directory
            }
        }
    }
}

/// Entry cache parameters exposed to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryCacheSettings {
    /// 0 disables the cache
    pub max_size: u32,
    pub timeout: Duration,
}

impl EntryCacheSettings {
    pub fn is_enabled(&self) -> bool {
        self.max_size > 0
    }
}

/// Configuration of one SQL directory.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectoryDescriptor {
    pub name: String,
    pub schema_name: String,
    /// Defaults to the directory name
    pub table_name: Option<String>,
    pub id_field: String,
    pub password_field: Option<String>,
    pub parent_directory: Option<String>,
    pub autoincrement_id_field: bool,
    /// Keep column and table names exactly as declared
    pub native_case: bool,
    pub cache_max_size: u32,
    pub cache_timeout_secs: u64,
    pub references: Vec<ReferenceDescriptor>,
    /// Directories to build before this one
    pub init_dependencies: Vec<String>,
    /// Named, pooled data source
    pub data_source: Option<String>,
    pub db_url: Option<String>,
    pub db_driver: Option<String>,
    pub db_user: Option<String>,
    /// Sensitive - not logged
    pub db_password: Option<String>,
    pub create_table_policy: CreateTablePolicy,
    pub data_file: Option<PathBuf>,
    pub data_file_character_separator: Option<String>,
    pub retry: RetryOptions,
}

impl std::fmt::Debug for DirectoryDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryDescriptor")
            .field("name", &self.name)
            .field("schema_name", &self.schema_name)
            .field("table_name", &self.table_name())
            .field("id_field", &self.id_field)
            .field("autoincrement_id_field", &self.autoincrement_id_field)
            .field("data_source", &self.data_source)
            .field("db_driver", &self.db_driver)
            .field("create_table_policy", &self.create_table_policy)
            .finish_non_exhaustive()
    }
}

impl DirectoryDescriptor {
    /// Create a descriptor with the required identity fields.
    pub fn new(
        name: impl Into<String>,
        schema_name: impl Into<String>,
        id_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            schema_name: schema_name.into(),
            id_field: id_field.into(),
            ..Self::default()
        }
    }

    /// Logical table name.
    pub fn table_name(&self) -> &str {
        self.table_name.as_deref().unwrap_or(&self.name)
    }

    /// Separator of the data file columns.
    pub fn separator(&self) -> char {
        self.data_file_character_separator
            .as_deref()
            .and_then(|s| s.chars().next())
            .unwrap_or(DEFAULT_DATA_FILE_SEPARATOR)
    }

    pub fn cache_settings(&self) -> EntryCacheSettings {
        EntryCacheSettings {
            max_size: self.cache_max_size,
            timeout: Duration::from_secs(self.cache_timeout_secs),
        }
    }

    /// Check if `field` is backed by a reference rather than a column.
    pub fn is_reference(&self, field: &str) -> bool {
        self.references.iter().any(|r| r.field_name() == field)
    }

    /// Reject descriptors that cannot produce a working directory.
    pub fn validate(&self) -> DirectoryResult<()> {
        let invalid = |message: String| Err(DirectoryError::configuration(&self.name, message));

        if self.name.trim().is_empty() {
            return invalid("directory name is empty".to_string());
        }
        if self.schema_name.trim().is_empty() {
            return invalid("schema name is empty".to_string());
        }
        if self.id_field.trim().is_empty() {
            return invalid("id field is empty".to_string());
        }
        match (&self.data_source, &self.db_url) {
            (Some(_), Some(_)) => {
                return invalid("both dataSource and dbUrl are set, use one".to_string());
            }
            (None, None) => return invalid("one of dataSource or dbUrl is required".to_string()),
            _ => {}
        }
        if let Some(reference) = self.references.iter().find(|r| r.field_name().trim().is_empty()) {
            return invalid(format!(
                "reference to directory '{}' has an empty field name",
                reference.target_directory()
            ));
        }
        if let Some(sep) = &self.data_file_character_separator {
            if sep.chars().count() != 1 {
                return invalid(format!(
                    "dataFileCharacterSeparator must be a single character, got '{}'",
                    sep
                ));
            }
        }
        if self.retry.max_attempts == Some(0) {
            return invalid("retry maxAttempts must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Named data source given as `name=url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceConfig {
    pub name: String,
    /// Full connection URL (sensitive - not logged).
    pub url: String,
    pub pool_options: PoolOptions,
}

impl DataSourceConfig {
    /// Pool option keys that we extract from URL query parameters.
    const POOL_OPTION_KEYS: &'static [&'static str] = &[
        "max_connections",
        "min_connections",
        "idle_timeout",
        "acquire_timeout",
        "test_before_acquire",
    ];

    /// Parse a data source from a CLI argument.
    ///
    /// # Format
    ///
    /// - `name=connection_string` - Named data source
    /// - `connection_string` - Uses the database name as data source name
    ///
    /// Pool options ride along as query parameters and are stripped from
    /// the URL handed to the driver.
    ///
    /// ```text
    /// sqlite:directories.db                                  # name "directories"
    /// users=postgres://u:p@host/dirdb?max_connections=20     # name "users"
    /// ```
    pub fn parse(s: &str) -> Result<Self, String> {
        // Split name=url format (only if '=' before '://')
        let scheme_pos = s.find("://").unwrap_or(s.len());
        let (explicit_name, url_str) = match s[..scheme_pos].find('=') {
            Some(idx) => (Some(s[..idx].trim()), &s[idx + 1..]),
            None => (None, s),
        };
        Self::from_parts(explicit_name, url_str)
    }

    /// Build from an optional explicit name and a URL.
    pub fn from_parts(explicit_name: Option<&str>, url_str: &str) -> Result<Self, String> {
        let mut url = Url::parse(url_str).map_err(|e| format!("Invalid URL: {e}"))?;
        let mut opts = Self::extract_options(&mut url, Self::POOL_OPTION_KEYS);

        let pool_options = Self::parse_pool_options(&mut opts);
        pool_options.validate()?;

        let name = explicit_name
            .filter(|n| !n.is_empty())
            .map(String::from)
            .or_else(|| Self::db_name(&url))
            .ok_or_else(|| format!("Cannot derive a data source name from '{}'", url.scheme()))?;

        Ok(Self {
            name,
            url: url.to_string(),
            pool_options,
        })
    }

    /// Parse pool options from extracted URL query parameters.
    fn parse_pool_options(opts: &mut HashMap<String, String>) -> PoolOptions {
        PoolOptions {
            max_connections: opts.remove("max_connections").and_then(|v| v.parse().ok()),
            min_connections: opts.remove("min_connections").and_then(|v| v.parse().ok()),
            idle_timeout_secs: opts.remove("idle_timeout").and_then(|v| v.parse().ok()),
            acquire_timeout_secs: opts.remove("acquire_timeout").and_then(|v| v.parse().ok()),
            test_before_acquire: opts.remove("test_before_acquire").and_then(|v| {
                if v.eq_ignore_ascii_case("true") {
                    Some(true)
                } else if v.eq_ignore_ascii_case("false") {
                    Some(false)
                } else {
                    None // Invalid value ignored
                }
            }),
        }
    }

    /// Extract pool options from URL query params, keeping others for the driver.
    /// Uses proper URL encoding to preserve special characters in remaining params.
    fn extract_options(url: &mut Url, keys: &[&str]) -> HashMap<String, String> {
        let mut opts = HashMap::new();
        let remaining: Vec<(String, String)> = url
            .query_pairs()
            .filter_map(|(k, v)| {
                let key_lower = k.to_ascii_lowercase();
                if keys.contains(&key_lower.as_str()) {
                    opts.insert(key_lower, v.into_owned());
                    None
                } else {
                    Some((k.into_owned(), v.into_owned()))
                }
            })
            .collect();

        if remaining.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(remaining);
        }
        opts
    }

    fn db_name(url: &Url) -> Option<String> {
        url.path()
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.trim_end_matches(".sqlite").trim_end_matches(".db"))
            .filter(|s| !s.is_empty())
            .map(String::from)
    }
}

/// Contents of a descriptor file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectoryFile {
    /// Data source name to URL
    pub data_sources: IndexMap<String, String>,
    pub directories: Vec<DirectoryDescriptor>,
}

impl DirectoryFile {
    /// Load and validate a descriptor file.
    pub fn from_json_file(path: impl AsRef<Path>) -> DirectoryResult<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| DirectoryError::io(&display, e))?;
        let file: Self = serde_json::from_str(&content).map_err(|e| DirectoryError::io(&display, e))?;
        for directory in &file.directories {
            directory.validate()?;
        }
        Ok(file)
    }

    /// Data sources declared in the file.
    pub fn data_source_configs(&self) -> Result<Vec<DataSourceConfig>, String> {
        self.data_sources
            .iter()
            .map(|(name, url)| DataSourceConfig::from_parts(Some(name), url))
            .collect()
    }
}

/// Command line of the `sql-directory` tool.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sql-directory",
    about = "Build schema-driven SQL directories and provision their tables",
    version
)]
pub struct Config {
    /// Directory descriptor file (JSON)
    #[arg(long, value_name = "FILE", env = "SQL_DIRECTORY_DESCRIPTOR")]
    pub descriptor: PathBuf,

    /// Schema file (JSON array of schemas)
    #[arg(long, value_name = "FILE", env = "SQL_DIRECTORY_SCHEMAS")]
    pub schemas: PathBuf,

    /// Named data sources, "name=url". Can be specified multiple times.
    #[arg(
        short = 'd',
        long = "data-source",
        value_name = "NAME=URL",
        env = "SQL_DIRECTORY_DATA_SOURCE",
        value_delimiter = ','
    )]
    pub data_sources: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SQL_DIRECTORY_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SQL_DIRECTORY_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse all data source arguments.
    pub fn parse_data_sources(&self) -> Result<Vec<DataSourceConfig>, String> {
        self.data_sources
            .iter()
            .map(|s| DataSourceConfig::parse(s))
            .collect()
    }
}
