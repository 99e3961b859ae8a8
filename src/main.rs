//! SQL Directory - Main entry point.
//!
//! Builds every directory of a descriptor file (dependencies first),
//! provisioning their tables, then shuts them down.

use clap::Parser;
use sql_directory::config::{Config, DataSourceConfig, DirectoryFile};
use sql_directory::db::DataSourceRegistry;
use sql_directory::directory::{DirectoryEnvironment, DirectoryService};
use sql_directory::models::SchemaRegistry;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!("Starting SQL Directory v{}", env!("CARGO_PKG_VERSION"));

    let schemas = Arc::new(SchemaRegistry::new());
    let count = schemas.load_json_file(&config.schemas)?;
    info!(count, file = %config.schemas.display(), "Loaded schemas");

    let file = DirectoryFile::from_json_file(&config.descriptor)?;

    // Data sources from the descriptor file, then from the command line
    let mut sources: Vec<DataSourceConfig> = file.data_source_configs()?;
    sources.extend(config.parse_data_sources()?);

    let registry = DataSourceRegistry::new();
    for source in &sources {
        info!(data_source = %source.name, "Connecting data source");
        registry
            .connect(&source.name, &source.url, &source.pool_options)
            .await?;
    }

    let env = DirectoryEnvironment::new(schemas).with_data_sources(registry.clone());
    let service = DirectoryService::new(file.directories, env)?;

    let result = service.build_all().await;
    match &result {
        Ok(directories) => {
            for directory in directories {
                let table = directory.table();
                info!(
                    directory = %directory.name(),
                    table = %table.name,
                    columns = ?directory.stored_field_names(),
                    multi_tenant = directory.is_multi_tenant(),
                    setup = ?directory.setup_outcome(),
                    "Directory table"
                );
            }
        }
        Err(e) => error!(error = %e, "Directory initialization failed"),
    }

    service.shutdown_all().await;
    registry.close_all().await;

    result?;
    info!("Shutdown complete");
    Ok(())
}
