//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Physical connections over the sqlx backends
//! - Pooled and unpooled data sources
//! - Retry policy for connection acquisition
//! - Table provisioning and seed data loading
//! - Dialect handling and type mappings

pub mod connection;
pub mod data_file;
pub mod dialect;
pub mod params;
pub mod pool;
pub mod retry;
pub mod table_setup;
pub mod types;

pub use connection::{
    Connection, DbConnection, ExecuteOutcome, MySqlConnectionHandle, PgConnectionHandle,
    SqliteConnectionHandle,
};
pub use data_file::DataFile;
pub use dialect::DatabaseType;
pub use pool::{DataSource, DataSourceRegistry, DbPool, PooledDataSource, SimpleDataSource};
pub use retry::{RetryDecision, RetryPolicy, Sleeper, TokioSleeper};
pub use table_setup::{TableSetup, TableSetupOutcome};
pub use types::TypeCategory;
