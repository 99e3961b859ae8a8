//! SQL directories.
//!
//! - [`SqlDirectory`]: table derivation, provisioning and the session registry
//! - [`Session`]: one caller's unit of work, with entry operations
//! - [`DirectoryService`]: builds directories by name, dependencies first
//! - [`MetricsSink`]: live and peak session counters

mod cleaner;
pub mod mapper;
pub mod metrics;
pub mod provisioner;
mod registry;
pub mod service;
pub mod session;
pub mod sql_directory;
mod statements;

pub use mapper::{DirectoryMapping, derive_table};
pub use metrics::{InMemoryMetrics, MetricsSink, SESSION_COUNT, SESSION_MAX_COUNT};
pub use provisioner::ConnectionProvisioner;
pub use service::DirectoryService;
pub use session::Session;
pub use sql_directory::{DirectoryEnvironment, SqlDirectory, TENANT_ID_FIELD};
