//! SQL Directory Library
//!
//! Schema-driven directories backed by SQL tables (SQLite, PostgreSQL,
//! MySQL): the physical table is derived from a field schema at runtime,
//! provisioned on construction, and accessed through sessions that never
//! outlive the transaction they were opened in.

pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod models;
pub mod transaction;

pub use config::{Config, DirectoryDescriptor};
pub use directory::{DirectoryEnvironment, DirectoryService, Session, SqlDirectory};
pub use error::{DirectoryError, DirectoryResult};
pub use transaction::{LocalTransaction, TransactionContext};
