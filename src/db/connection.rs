//! Physical database connections.
//!
//! A session owns exactly one [`DbConnection`]. Pooled handles go back to
//! their pool when released; direct handles are physically closed.
//!
//! Statements run in autocommit mode unless the caller opens an explicit
//! transaction with [`Connection::begin`].

use crate::db::DatabaseType;
use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::types::{RowDecode, TypeCategory};
use crate::error::DirectoryResult;
use crate::models::SqlValue;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlQueryResult;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgQueryResult;
use sqlx::sqlite::SqliteQueryResult;
use sqlx::{Connection as _, Database, MySql, Postgres, Sqlite};

/// Result of a data-modifying statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOutcome {
    pub rows_affected: u64,
    /// Generated id, when the backend reports one
    pub last_insert_id: Option<i64>,
}

/// A single physical connection to a directory database.
#[async_trait]
pub trait Connection: Send + std::fmt::Debug {
    /// Backend dialect of this connection.
    fn database_type(&self) -> DatabaseType;

    /// Run a statement that returns no rows.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DirectoryResult<ExecuteOutcome>;

    /// Run a query, decoding each row's leading columns by category.
    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        categories: &[TypeCategory],
    ) -> DirectoryResult<Vec<Vec<JsonValue>>>;

    /// Open an explicit transaction.
    async fn begin(&mut self) -> DirectoryResult<()> {
        let statement = self.database_type().begin_statement();
        self.execute(statement, &[]).await.map(|_| ())
    }

    async fn commit(&mut self) -> DirectoryResult<()> {
        self.execute("COMMIT", &[]).await.map(|_| ())
    }

    async fn rollback(&mut self) -> DirectoryResult<()> {
        self.execute("ROLLBACK", &[]).await.map(|_| ())
    }

    /// Release the connection: return it to its pool or close it.
    async fn close(self: Box<Self>) -> DirectoryResult<()>;
}

/// Owned connection handle.
pub type DbConnection = Box<dyn Connection>;

/// Either a pooled or a directly-opened sqlx connection.
enum Physical<DB: Database> {
    Pooled(PoolConnection<DB>),
    Direct(DB::Connection),
}

impl<DB: Database> Physical<DB> {
    fn as_mut(&mut self) -> &mut DB::Connection {
        match self {
            Physical::Pooled(conn) => &mut **conn,
            Physical::Direct(conn) => conn,
        }
    }

    fn is_pooled(&self) -> bool {
        matches!(self, Physical::Pooled(_))
    }

    async fn release(self) -> DirectoryResult<()> {
        match self {
            // Dropping a pool connection hands it back to the pool
            Physical::Pooled(conn) => {
                drop(conn);
                Ok(())
            }
            Physical::Direct(conn) => conn.close().await.map_err(Into::into),
        }
    }
}

fn sqlite_last_id(outcome: &SqliteQueryResult) -> Option<i64> {
    Some(outcome.last_insert_rowid()).filter(|id| *id != 0)
}

fn postgres_last_id(_outcome: &PgQueryResult) -> Option<i64> {
    None
}

fn mysql_last_id(outcome: &MySqlQueryResult) -> Option<i64> {
    i64::try_from(outcome.last_insert_id())
        .ok()
        .filter(|id| *id != 0)
}

/// Generates a [`Connection`] implementation over one sqlx backend.
macro_rules! impl_sqlx_connection {
    (
        $(#[$meta:meta])*
        $handle:ident, $db:ty, $kind:expr, $bind:path, $last_id:path
    ) => {
        $(#[$meta])*
        pub struct $handle {
            inner: Physical<$db>,
        }

        impl $handle {
            /// Wrap a connection checked out of a pool.
            pub fn pooled(conn: PoolConnection<$db>) -> Self {
                Self {
                    inner: Physical::Pooled(conn),
                }
            }

            /// Wrap a directly-opened connection.
            pub fn direct(conn: <$db as Database>::Connection) -> Self {
                Self {
                    inner: Physical::Direct(conn),
                }
            }
        }

        impl std::fmt::Debug for $handle {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($handle))
                    .field("pooled", &self.inner.is_pooled())
                    .finish()
            }
        }

        #[async_trait]
        impl Connection for $handle {
            fn database_type(&self) -> DatabaseType {
                $kind
            }

            async fn execute(
                &mut self,
                sql: &str,
                params: &[SqlValue],
            ) -> DirectoryResult<ExecuteOutcome> {
                let conn = self.inner.as_mut();
                let outcome = if params.is_empty() {
                    sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(sql)).await?
                } else {
                    let mut query = sqlx::query(sql);
                    for param in params {
                        query = $bind(query, param);
                    }
                    query.execute(&mut *conn).await?
                };
                Ok(ExecuteOutcome {
                    rows_affected: outcome.rows_affected(),
                    last_insert_id: $last_id(&outcome),
                })
            }

            async fn fetch_all(
                &mut self,
                sql: &str,
                params: &[SqlValue],
                categories: &[TypeCategory],
            ) -> DirectoryResult<Vec<Vec<JsonValue>>> {
                let conn = self.inner.as_mut();
                let rows = if params.is_empty() {
                    sqlx::Executor::fetch_all(&mut *conn, sqlx::raw_sql(sql)).await?
                } else {
                    let mut query = sqlx::query(sql);
                    for param in params {
                        query = $bind(query, param);
                    }
                    query.fetch_all(&mut *conn).await?
                };
                Ok(rows.iter().map(|row| row.decode_row(categories)).collect())
            }

            async fn close(self: Box<Self>) -> DirectoryResult<()> {
                self.inner.release().await
            }
        }
    };
}

impl_sqlx_connection!(
    /// SQLite connection handle.
    SqliteConnectionHandle,
    Sqlite,
    DatabaseType::SQLite,
    bind_sqlite_param,
    sqlite_last_id
);

impl_sqlx_connection!(
    /// PostgreSQL connection handle. Generated ids come back through `RETURNING`.
    PgConnectionHandle,
    Postgres,
    DatabaseType::PostgreSQL,
    bind_postgres_param,
    postgres_last_id
);

impl_sqlx_connection!(
    /// MySQL / MariaDB connection handle.
    MySqlConnectionHandle,
    MySql,
    DatabaseType::MySQL,
    bind_mysql_param,
    mysql_last_id
);
