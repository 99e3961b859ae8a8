//! Table provisioning.
//!
//! Brings the physical table in line with its derived definition according
//! to the configured [`CreateTablePolicy`], and loads seed rows when the table
//! has just been created.

use crate::config::CreateTablePolicy;
use crate::db::connection::Connection;
use crate::db::data_file::DataFile;
use crate::db::types::TypeCategory;
use crate::db::DatabaseType;
use crate::error::{DirectoryError, DirectoryResult};
use crate::models::{SqlValue, Table};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What a setup run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSetupOutcome {
    pub created: bool,
    pub dropped: bool,
    /// Physical names of columns added to an existing table
    pub added_columns: Vec<String>,
    pub loaded_rows: usize,
}

/// Setup instructions for one table.
#[derive(Debug, Clone)]
pub struct TableSetup<'a> {
    pub table: &'a Table,
    pub policy: CreateTablePolicy,
    pub data_file: Option<PathBuf>,
    pub separator: char,
}

impl TableSetup<'_> {
    /// Run the setup on `conn`. SQL failures become [`DirectoryError::Setup`].
    pub async fn run(&self, conn: &mut dyn Connection) -> DirectoryResult<TableSetupOutcome> {
        let table = self.table;
        let dialect = conn.database_type();
        let mut outcome = TableSetupOutcome::default();

        if self.policy == CreateTablePolicy::Never {
            debug!(table = %table.name, "Table setup disabled");
            return Ok(outcome);
        }

        let existing = existing_columns(conn, dialect, &table.name)
            .await
            .map_err(|e| self.setup_error(e))?;
        let exists = !existing.is_empty();

        match self.policy {
            CreateTablePolicy::Always => {
                if exists {
                    info!(table = %table.name, "Dropping table");
                    self.exec(conn, &table.drop_sql(dialect)).await?;
                    outcome.dropped = true;
                }
                self.create(conn, dialect).await?;
                outcome.created = true;
            }
            CreateTablePolicy::OnMissingColumns if !exists => {
                self.create(conn, dialect).await?;
                outcome.created = true;
            }
            CreateTablePolicy::OnMissingColumns => {
                for column in &table.columns {
                    if existing.iter().any(|name| name.eq_ignore_ascii_case(&column.name)) {
                        continue;
                    }
                    info!(table = %table.name, column = %column.name, "Adding missing column");
                    self.exec(conn, &table.add_column_sql(column, dialect)).await?;
                    outcome.added_columns.push(column.name.clone());
                }
            }
            CreateTablePolicy::Never => {}
        }

        if outcome.created {
            if let Some(path) = &self.data_file {
                outcome.loaded_rows = self.load_data(conn, dialect, path).await?;
            }
        }
        Ok(outcome)
    }

    async fn create(&self, conn: &mut dyn Connection, dialect: DatabaseType) -> DirectoryResult<()> {
        info!(table = %self.table.name, "Creating table");
        self.exec(conn, &self.table.create_sql(dialect)).await
    }

    async fn exec(&self, conn: &mut dyn Connection, sql: &str) -> DirectoryResult<()> {
        debug!(table = %self.table.name, sql = %sql, "Table setup statement");
        conn.execute(sql, &[])
            .await
            .map(|_| ())
            .map_err(|e| self.setup_error(e))
    }

    async fn load_data(
        &self,
        conn: &mut dyn Connection,
        dialect: DatabaseType,
        path: &Path,
    ) -> DirectoryResult<usize> {
        let table = self.table;
        let data = DataFile::read(path, self.separator)?;

        let columns = data
            .header
            .iter()
            .map(|name| {
                table
                    .column(name)
                    .or_else(|| table.column_by_name(name))
                    .ok_or_else(|| {
                        DirectoryError::setup(
                            &table.name,
                            format!("data file column '{}' is not a stored field", name),
                        )
                    })
            })
            .collect::<DirectoryResult<Vec<_>>>()?;

        for row in &data.rows {
            let mut values = Vec::with_capacity(columns.len());
            let mut placeholders = Vec::with_capacity(columns.len());
            for (column, cell) in columns.iter().zip(row) {
                match cell {
                    None => placeholders.push("NULL".to_string()),
                    Some(text) => {
                        let value = SqlValue::from_text(&column.key, column.field_type, text)
                            .map_err(|e| self.setup_error(e))?;
                        values.push(value);
                        placeholders.push(dialect.placeholder(values.len()));
                    }
                }
            }
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                dialect.quote_ident(&table.name),
                columns
                    .iter()
                    .map(|c| dialect.quote_ident(&c.name))
                    .collect::<Vec<_>>()
                    .join(", "),
                placeholders.join(", ")
            );
            conn.execute(&sql, &values)
                .await
                .map_err(|e| self.setup_error(e))?;
        }

        info!(
            table = %table.name,
            rows = data.rows.len(),
            file = %path.display(),
            "Loaded data file"
        );
        Ok(data.rows.len())
    }

    fn setup_error(&self, err: DirectoryError) -> DirectoryError {
        match err {
            DirectoryError::Setup { .. } => err,
            other => DirectoryError::setup(&self.table.name, other.to_string()),
        }
    }
}

/// Physical column names of `table`; empty when the table does not exist.
pub async fn existing_columns(
    conn: &mut dyn Connection,
    dialect: DatabaseType,
    table: &str,
) -> DirectoryResult<Vec<String>> {
    let sql = match dialect {
        DatabaseType::SQLite => "SELECT name FROM pragma_table_info(?)".to_string(),
        DatabaseType::PostgreSQL => "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position"
            .to_string(),
        DatabaseType::MySQL => "SELECT CONVERT(column_name USING utf8mb4) \
             FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? \
             ORDER BY ordinal_position"
            .to_string(),
    };
    let rows = conn
        .fetch_all(&sql, &[SqlValue::String(table.to_string())], &[TypeCategory::Text])
        .await?;
    Ok(rows
        .into_iter()
        .filter_map(|mut row| row.pop())
        .filter_map(|value| value.as_str().map(String::from))
        .collect())
}
