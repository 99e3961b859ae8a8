//! Directory sessions.
//!
//! A session owns at most one physical connection. Unmanaged sessions open
//! it when the session is created; managed ones open it on first use. Once
//! closed, a session refuses every operation and `close` becomes a no-op.

use crate::db::{Connection, DataSource, DbConnection, TypeCategory};
use crate::directory::SqlDirectory;
use crate::directory::statements::{Statement, StatementBuilder};
use crate::error::{DirectoryError, DirectoryResult};
use crate::models::entry::id_to_string;
use crate::models::{Column, Entry, SqlValue};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};
use uuid::Uuid;

struct SessionInner {
    id: Uuid,
    directory: Arc<SqlDirectory>,
    managed: bool,
    live: AtomicBool,
    connection: Mutex<Option<DbConnection>>,
    /// Data source shared by the transaction the session was opened in
    shared_source: Option<Arc<dyn DataSource>>,
    created_at: DateTime<Utc>,
}

/// Handle on an open session. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("directory", &self.inner.directory.name())
            .field("managed", &self.inner.managed)
            .field("live", &self.is_live())
            .finish()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Session {}

impl Session {
    pub(crate) fn new(
        directory: Arc<SqlDirectory>,
        managed: bool,
        connection: Option<DbConnection>,
        shared_source: Option<Arc<dyn DataSource>>,
    ) -> Self {
        let id = Uuid::new_v4();
        trace!(directory = %directory.name(), session_id = %id, managed, "Session opened");
        Self {
            inner: Arc::new(SessionInner {
                id,
                directory,
                managed,
                live: AtomicBool::new(true),
                connection: Mutex::new(connection),
                shared_source,
                created_at: Utc::now(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn directory(&self) -> &Arc<SqlDirectory> {
        &self.inner.directory
    }

    pub fn is_managed(&self) -> bool {
        self.inner.managed
    }

    /// Check if the session has not been closed yet.
    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Check if the session holds a physical connection.
    pub async fn has_connection(&self) -> bool {
        self.inner.connection.lock().await.is_some()
    }

    /// Close the session and release its connection.
    ///
    /// The session leaves its directory even when releasing the connection
    /// fails; the failure is returned. Closing twice does nothing.
    pub async fn close(&self) -> DirectoryResult<()> {
        if !self.inner.live.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let connection = self.inner.connection.lock().await.take();
        let result = match connection {
            Some(conn) => conn.close().await,
            None => Ok(()),
        };
        self.inner.directory.remove_session(self);
        debug!(directory = %self.inner.directory.name(), session_id = %self.inner.id, "Session closed");
        result
    }

    // =========================================================================
    // Entry operations
    // =========================================================================

    /// Fetch an entry by id.
    pub async fn get_entry(&self, id: &str) -> DirectoryResult<Option<Entry>> {
        let stmt = self.builder()?.select_by_id(self.id_value(id)?);
        let mut rows = self.fetch(&stmt).await?;
        Ok(rows.pop().and_then(|row| self.to_entry(row)))
    }

    pub async fn has_entry(&self, id: &str) -> DirectoryResult<bool> {
        let stmt = self.builder()?.count_by_id(self.id_value(id)?);
        let mut guard = self.connection().await?;
        let conn = connected(&mut guard)?;
        let rows = conn
            .fetch_all(&stmt.sql, &stmt.params, &[TypeCategory::Integer])
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(JsonValue::as_i64)
            .is_some_and(|count| count > 0))
    }

    /// Insert an entry and return it as stored.
    ///
    /// With an autoincrement id the given id, if any, is ignored and the
    /// generated one is returned. Reference fields are skipped.
    pub async fn create_entry(&self, fields: IndexMap<String, JsonValue>) -> DirectoryResult<Entry> {
        let directory = self.inner.directory.clone();
        let id_column = directory.id_column()?;
        let autoincrement = id_column.identity;

        if !autoincrement {
            let id = fields
                .get(&id_column.key)
                .and_then(id_to_string)
                .ok_or_else(|| {
                    DirectoryError::session(format!(
                        "Missing id field '{}' for new entry in directory '{}'",
                        id_column.key,
                        directory.name()
                    ))
                })?;
            if self.has_entry(&id).await? {
                return Err(DirectoryError::session(format!(
                    "Entry with id {} already exists in directory '{}'",
                    id,
                    directory.name()
                )));
            }
        }

        let values = self
            .column_values(&fields)?
            .into_iter()
            .filter(|(column, _)| !(autoincrement && column.primary))
            .collect();
        let dialect = directory.dialect();
        let returning = autoincrement && dialect.supports_returning();
        let stmt = self.builder()?.insert(values, returning);

        let id = {
            let mut guard = self.connection().await?;
            let conn = connected(&mut guard)?;
            if returning {
                let rows = conn
                    .fetch_all(&stmt.sql, &stmt.params, &[TypeCategory::Integer])
                    .await?;
                rows.first().and_then(|row| row.first()).and_then(id_to_string)
            } else {
                let outcome = conn.execute(&stmt.sql, &stmt.params).await?;
                if autoincrement {
                    outcome.last_insert_id.map(|id| id.to_string())
                } else {
                    fields.get(&id_column.key).and_then(id_to_string)
                }
            }
        }
        .ok_or_else(|| DirectoryError::session("Cannot determine the id of the created entry"))?;

        debug!(directory = %directory.name(), entry_id = %id, "Entry created");
        self.get_entry(&id).await?.ok_or_else(|| {
            DirectoryError::session(format!("Created entry {} cannot be read back", id))
        })
    }

    /// Write the entry's stored fields. Returns `false` if no row has its id.
    pub async fn update_entry(&self, entry: &Entry) -> DirectoryResult<bool> {
        let id = self.id_value(&entry.id)?;
        let values: Vec<_> = self
            .column_values(&entry.fields)?
            .into_iter()
            .filter(|(column, _)| !column.primary)
            .collect();
        if values.is_empty() {
            return self.has_entry(&entry.id).await;
        }
        let stmt = self.builder()?.update(values, id);
        Ok(self.execute(&stmt).await? > 0)
    }

    /// Delete an entry. Returns `false` if it did not exist.
    pub async fn delete_entry(&self, id: &str) -> DirectoryResult<bool> {
        let stmt = self.builder()?.delete(self.id_value(id)?);
        Ok(self.execute(&stmt).await? > 0)
    }

    /// Entries whose stored fields equal every filter value. A null filter
    /// value matches NULL columns. An empty filter returns every entry.
    pub async fn query(&self, filter: &IndexMap<String, JsonValue>) -> DirectoryResult<Vec<Entry>> {
        let stmt = self.builder()?.select_where(self.column_values(filter)?);
        let rows = self.fetch(&stmt).await?;
        Ok(rows.into_iter().filter_map(|row| self.to_entry(row)).collect())
    }

    /// Values of one stored field over the entries matching `filter`.
    pub async fn get_projection(
        &self,
        filter: &IndexMap<String, JsonValue>,
        field: &str,
    ) -> DirectoryResult<Vec<JsonValue>> {
        if self.inner.directory.table().column(field).is_none() {
            return Err(self.not_stored(field));
        }
        Ok(self
            .query(filter)
            .await?
            .into_iter()
            .map(|mut entry| entry.fields.shift_remove(field).unwrap_or(JsonValue::Null))
            .collect())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn check_live(&self) -> DirectoryResult<()> {
        if !self.is_live() {
            return Err(DirectoryError::session(format!(
                "Session {} of directory '{}' is closed",
                self.inner.id,
                self.inner.directory.name()
            )));
        }
        Ok(())
    }

    async fn connection(&self) -> DirectoryResult<MutexGuard<'_, Option<DbConnection>>> {
        self.check_live()?;
        let mut guard = self.inner.connection.lock().await;
        // close() may have won the race while we waited for the lock
        self.check_live()?;
        if guard.is_none() {
            let conn = self
                .inner
                .directory
                .provisioner()
                .acquire_with(self.inner.shared_source.as_ref())
                .await?;
            *guard = Some(conn);
        }
        Ok(guard)
    }

    fn builder(&self) -> DirectoryResult<StatementBuilder<'_>> {
        let directory = &self.inner.directory;
        Ok(StatementBuilder::new(
            directory.table(),
            directory.id_column()?,
            directory.dialect(),
        ))
    }

    fn id_value(&self, id: &str) -> DirectoryResult<SqlValue> {
        let column = self.inner.directory.id_column()?;
        SqlValue::from_text(&column.key, column.field_type, id)
    }

    /// Stored columns and typed values for `fields`, in the given order.
    fn column_values(
        &self,
        fields: &IndexMap<String, JsonValue>,
    ) -> DirectoryResult<Vec<(&Column, SqlValue)>> {
        let directory = &self.inner.directory;
        let mut values = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            if !directory.schema_field_map().contains_key(name) {
                return Err(DirectoryError::session(format!(
                    "Field '{}' is not in schema '{}'",
                    name,
                    directory.schema().name
                )));
            }
            match directory.table().column(name) {
                Some(column) => {
                    values.push((column, SqlValue::from_json(name, column.field_type, value)?))
                }
                None => trace!(field = %name, "Skipping reference field"),
            }
        }
        Ok(values)
    }

    fn not_stored(&self, field: &str) -> DirectoryError {
        DirectoryError::session(format!(
            "Field '{}' is not stored in directory '{}'",
            field,
            self.inner.directory.name()
        ))
    }

    async fn fetch(&self, stmt: &Statement) -> DirectoryResult<Vec<Vec<JsonValue>>> {
        let categories: Vec<TypeCategory> = self
            .inner
            .directory
            .table()
            .columns
            .iter()
            .map(|c| TypeCategory::from(c.field_type))
            .collect();
        let mut guard = self.connection().await?;
        let conn = connected(&mut guard)?;
        trace!(sql = %stmt.sql, "Fetching entries");
        conn.fetch_all(&stmt.sql, &stmt.params, &categories).await
    }

    async fn execute(&self, stmt: &Statement) -> DirectoryResult<u64> {
        let mut guard = self.connection().await?;
        let conn = connected(&mut guard)?;
        trace!(sql = %stmt.sql, "Executing statement");
        Ok(conn.execute(&stmt.sql, &stmt.params).await?.rows_affected)
    }

    fn to_entry(&self, row: Vec<JsonValue>) -> Option<Entry> {
        let table = self.inner.directory.table();
        let fields: IndexMap<String, JsonValue> = table
            .columns
            .iter()
            .map(|c| c.key.clone())
            .zip(row)
            .collect();
        let id = table
            .primary_column()
            .and_then(|c| fields.get(&c.key))
            .and_then(id_to_string)?;
        Some(Entry::new(id, fields))
    }
}

fn connected<'g>(
    guard: &'g mut MutexGuard<'_, Option<DbConnection>>,
) -> DirectoryResult<&'g mut (dyn Connection + 'static)> {
    guard
        .as_deref_mut()
        .ok_or_else(|| DirectoryError::session("Session has no connection"))
}
