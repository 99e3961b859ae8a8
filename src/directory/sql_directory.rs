//! The directory facade.

use crate::config::{DirectoryDescriptor, EntryCacheSettings};
use crate::db::{Connection, DataSourceRegistry, DatabaseType, Sleeper, TableSetup, TableSetupOutcome, TokioSleeper};
use crate::directory::cleaner::TxSessionCleaner;
use crate::directory::mapper::{DirectoryMapping, derive_table};
use crate::directory::metrics::{InMemoryMetrics, MetricsSink};
use crate::directory::provisioner::ConnectionProvisioner;
use crate::directory::registry::SessionRegistry;
use crate::directory::session::Session;
use crate::error::{DirectoryError, DirectoryResult};
use crate::models::{Column, Field, Schema, SchemaManager, Table};
use crate::transaction::TransactionContext;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Reserved column marking multi-tenant directories.
pub const TENANT_ID_FIELD: &str = "tenantId";

/// Collaborators shared by the directories of one service.
#[derive(Clone)]
pub struct DirectoryEnvironment {
    pub schemas: Arc<dyn SchemaManager>,
    pub data_sources: DataSourceRegistry,
    pub metrics: Arc<dyn MetricsSink>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl DirectoryEnvironment {
    /// Environment with an empty data source registry, in-memory metrics and
    /// the tokio timer.
    pub fn new(schemas: Arc<dyn SchemaManager>) -> Self {
        Self {
            schemas,
            data_sources: DataSourceRegistry::new(),
            metrics: Arc::new(InMemoryMetrics::new()),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_data_sources(mut self, data_sources: DataSourceRegistry) -> Self {
        self.data_sources = data_sources;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

/// A schema-bound, table-backed entry store.
pub struct SqlDirectory {
    descriptor: DirectoryDescriptor,
    schema: Arc<Schema>,
    table: Table,
    schema_field_map: IndexMap<String, Field>,
    stored_field_names: Vec<String>,
    dialect: DatabaseType,
    setup_outcome: TableSetupOutcome,
    provisioner: ConnectionProvisioner,
    sessions: SessionRegistry<Session>,
}

impl std::fmt::Debug for SqlDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlDirectory")
            .field("name", &self.descriptor.name)
            .field("table", &self.table.name)
            .field("dialect", &self.dialect)
            .field("sessions", &self.sessions.live_count())
            .finish_non_exhaustive()
    }
}

impl SqlDirectory {
    /// Build a directory: acquire a setup connection, derive the table from
    /// the schema, provision it, release the connection.
    ///
    /// Any failure aborts construction; the setup connection is closed in
    /// every case.
    pub async fn new(
        descriptor: DirectoryDescriptor,
        env: &DirectoryEnvironment,
    ) -> DirectoryResult<Arc<Self>> {
        descriptor.validate()?;
        let provisioner =
            ConnectionProvisioner::new(&descriptor, &env.data_sources, env.sleeper.clone())?;

        let mut conn = provisioner.acquire(None).await?;
        let dialect = conn.database_type();
        let prepared = Self::prepare(&descriptor, env, conn.as_mut(), provisioner.is_managed()).await;
        let closed = conn.close().await;
        if let (Err(_), Err(close)) = (&prepared, &closed) {
            warn!(directory = %descriptor.name, error = %close, "Cannot release setup connection");
        }
        let (mapping, setup_outcome) = prepared?;
        closed.map_err(|e| {
            DirectoryError::setup(
                &mapping.table.name,
                format!("cannot release setup connection: {}", e),
            )
        })?;

        let DirectoryMapping {
            schema,
            table,
            schema_field_map,
            stored_field_names,
        } = mapping;
        info!(
            directory = %descriptor.name,
            table = %table.name,
            dialect = %dialect,
            columns = table.columns.len(),
            managed = provisioner.is_managed(),
            "SQL directory ready"
        );

        Ok(Arc::new(Self {
            descriptor,
            schema,
            table,
            schema_field_map,
            stored_field_names,
            dialect,
            setup_outcome,
            provisioner,
            sessions: SessionRegistry::new(env.metrics.clone()),
        }))
    }

    async fn prepare(
        descriptor: &DirectoryDescriptor,
        env: &DirectoryEnvironment,
        conn: &mut dyn Connection,
        managed: bool,
    ) -> DirectoryResult<(DirectoryMapping, TableSetupOutcome)> {
        let mapping = derive_table(env.schemas.as_ref(), descriptor, conn.database_type())?;
        let setup = TableSetup {
            table: &mapping.table,
            policy: descriptor.create_table_policy,
            data_file: descriptor.data_file.clone(),
            separator: descriptor.separator(),
        };

        if managed {
            let outcome = setup.run(conn).await?;
            return Ok((mapping, outcome));
        }

        // Unmanaged connections have no outer transaction: run the setup in
        // our own and commit it.
        conn.begin()
            .await
            .map_err(|e| DirectoryError::setup(&mapping.table.name, e.to_string()))?;
        let outcome = match setup.run(conn).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(rollback) = conn.rollback().await {
                    warn!(table = %mapping.table.name, error = %rollback, "Setup rollback failed");
                }
                return Err(e);
            }
        };
        conn.commit()
            .await
            .map_err(|e| DirectoryError::setup(&mapping.table.name, e.to_string()))?;
        Ok((mapping, outcome))
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Open a session.
    ///
    /// When `tx` is active the session is registered for closing at its
    /// completion; if that registration fails the session is closed and the
    /// call fails.
    pub async fn get_session(
        self: &Arc<Self>,
        tx: Option<&dyn TransactionContext>,
    ) -> DirectoryResult<Session> {
        if self.is_shut_down() {
            return Err(self.shut_down_error());
        }

        let shared = tx.and_then(|tx| self.provisioner.shared_source(tx));
        let managed = shared.is_some() || self.provisioner.is_managed();
        let connection = if managed {
            None
        } else {
            Some(self.provisioner.acquire_with(None).await?)
        };

        let session = Session::new(self.clone(), managed, connection, shared);
        // Shutdown may have drained the registry while the connection opened
        let Some(live) = self.sessions.add(session.clone()) else {
            if let Err(close) = session.close().await {
                warn!(directory = %self.name(), error = %close, "Cannot close session opened during shutdown");
            }
            return Err(self.shut_down_error());
        };
        debug!(directory = %self.name(), session_id = %session.id(), live, "Session added");

        if let Some(tx) = tx.filter(|tx| tx.is_active()) {
            let cleaner = Arc::new(TxSessionCleaner::new(session.clone()));
            if let Err(e) = tx.register_synchronization(cleaner) {
                if let Err(close) = session.close().await {
                    error!(directory = %self.name(), error = %close, "Cannot close unregistered session");
                }
                return Err(DirectoryError::registration(self.name(), e.to_string()));
            }
        }
        Ok(session)
    }

    /// Forget a closed session. Unknown sessions are ignored.
    pub(crate) fn remove_session(&self, session: &Session) -> bool {
        self.sessions.remove(|s| s == session)
    }

    /// Close every live session and interrupt pending connection retries.
    ///
    /// A session failing to close is logged; the others are still closed.
    pub async fn shutdown(&self) {
        self.provisioner.interrupt();
        let sessions = self.sessions.drain();
        if !sessions.is_empty() {
            info!(directory = %self.name(), sessions = sessions.len(), "Closing live sessions");
        }
        for session in sessions {
            if let Err(e) = session.close().await {
                error!(
                    directory = %self.name(),
                    session_id = %session.id(),
                    error = %e,
                    "Error closing sql directory session"
                );
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.sessions.is_closed()
    }

    fn shut_down_error(&self) -> DirectoryError {
        DirectoryError::session(format!("Directory '{}' is shut down", self.name()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.live_count()
    }

    /// Highest number of sessions live at once.
    pub fn max_session_count(&self) -> usize {
        self.sessions.max_count()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &DirectoryDescriptor {
        &self.descriptor
    }

    pub fn schema_name(&self) -> &str {
        &self.descriptor.schema_name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn id_field(&self) -> &str {
        &self.descriptor.id_field
    }

    pub fn password_field(&self) -> Option<&str> {
        self.descriptor.password_field.as_deref()
    }

    pub fn parent_directory(&self) -> Option<&str> {
        self.descriptor.parent_directory.as_deref()
    }

    /// Check if the table carries the reserved tenant column.
    pub fn is_multi_tenant(&self) -> bool {
        self.table.column(TENANT_ID_FIELD).is_some()
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub(crate) fn id_column(&self) -> DirectoryResult<&Column> {
        self.table.primary_column().ok_or_else(|| {
            DirectoryError::configuration(self.name(), "table has no primary column")
        })
    }

    pub fn schema_field_map(&self) -> &IndexMap<String, Field> {
        &self.schema_field_map
    }

    pub fn stored_field_names(&self) -> &[String] {
        &self.stored_field_names
    }

    pub fn dialect(&self) -> DatabaseType {
        self.dialect
    }

    /// What table setup did when the directory was built.
    pub fn setup_outcome(&self) -> &TableSetupOutcome {
        &self.setup_outcome
    }

    pub fn cache_settings(&self) -> EntryCacheSettings {
        self.descriptor.cache_settings()
    }

    /// Check if sessions use managed (pooled or shared) connections.
    pub fn is_managed(&self) -> bool {
        self.provisioner.is_managed()
    }

    pub(crate) fn provisioner(&self) -> &ConnectionProvisioner {
        &self.provisioner
    }
}
