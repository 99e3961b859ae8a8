//! SQL generation for entry operations.
//!
//! NULL values are written as the `NULL` literal rather than bound, so
//! placeholders only carry typed values.

use crate::db::DatabaseType;
use crate::models::{Column, SqlValue, Table};

/// A statement with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    fn new() -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Render `value` as a placeholder, or as `NULL`.
    fn bind(&mut self, dialect: DatabaseType, value: SqlValue) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.params.push(value);
        dialect.placeholder(self.params.len())
    }
}

/// Builds statements over one table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatementBuilder<'a> {
    table: &'a Table,
    id: &'a Column,
    dialect: DatabaseType,
}

impl<'a> StatementBuilder<'a> {
    pub fn new(table: &'a Table, id: &'a Column, dialect: DatabaseType) -> Self {
        Self { table, id, dialect }
    }

    fn quote(&self, ident: &str) -> String {
        self.dialect.quote_ident(ident)
    }

    fn select_list(&self) -> String {
        self.table
            .columns
            .iter()
            .map(|c| self.quote(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn id_condition(&self, stmt: &mut Statement, id: SqlValue) -> String {
        format!("{} = {}", self.quote(&self.id.name), stmt.bind(self.dialect, id))
    }

    /// Every column of the entry with the given id.
    pub fn select_by_id(&self, id: SqlValue) -> Statement {
        let mut stmt = Statement::new();
        let condition = self.id_condition(&mut stmt, id);
        stmt.sql = format!(
            "SELECT {} FROM {} WHERE {}",
            self.select_list(),
            self.quote(&self.table.name),
            condition
        );
        stmt
    }

    pub fn count_by_id(&self, id: SqlValue) -> Statement {
        let mut stmt = Statement::new();
        let condition = self.id_condition(&mut stmt, id);
        stmt.sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.quote(&self.table.name),
            condition
        );
        stmt
    }

    /// INSERT of `values`; `returning` asks for the generated id back.
    pub fn insert(&self, values: Vec<(&Column, SqlValue)>, returning: bool) -> Statement {
        let mut stmt = Statement::new();
        let mut names = Vec::with_capacity(values.len());
        let mut slots = Vec::with_capacity(values.len());
        for (column, value) in values {
            names.push(self.quote(&column.name));
            slots.push(stmt.bind(self.dialect, value));
        }
        stmt.sql = if names.is_empty() && self.dialect == DatabaseType::MySQL {
            format!("INSERT INTO {} () VALUES ()", self.quote(&self.table.name))
        } else if names.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.quote(&self.table.name))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.quote(&self.table.name),
                names.join(", "),
                slots.join(", ")
            )
        };
        if returning {
            stmt.sql.push_str(" RETURNING ");
            stmt.sql.push_str(&self.quote(&self.id.name));
        }
        stmt
    }

    pub fn update(&self, values: Vec<(&Column, SqlValue)>, id: SqlValue) -> Statement {
        let mut stmt = Statement::new();
        let assignments = values
            .into_iter()
            .map(|(column, value)| {
                format!("{} = {}", self.quote(&column.name), stmt.bind(self.dialect, value))
            })
            .collect::<Vec<_>>()
            .join(", ");
        let condition = self.id_condition(&mut stmt, id);
        stmt.sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.quote(&self.table.name),
            assignments,
            condition
        );
        stmt
    }

    pub fn delete(&self, id: SqlValue) -> Statement {
        let mut stmt = Statement::new();
        let condition = self.id_condition(&mut stmt, id);
        stmt.sql = format!(
            "DELETE FROM {} WHERE {}",
            self.quote(&self.table.name),
            condition
        );
        stmt
    }

    /// Entries matching every `(column, value)` pair, ordered by id.
    pub fn select_where(&self, filter: Vec<(&Column, SqlValue)>) -> Statement {
        let mut stmt = Statement::new();
        let conditions: Vec<String> = filter
            .into_iter()
            .map(|(column, value)| {
                let name = self.quote(&column.name);
                if value.is_null() {
                    format!("{} IS NULL", name)
                } else {
                    format!("{} = {}", name, stmt.bind(self.dialect, value))
                }
            })
            .collect();
        let mut sql = format!(
            "SELECT {} FROM {}",
            self.select_list(),
            self.quote(&self.table.name)
        );
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&self.quote(&self.id.name));
        stmt.sql = sql;
        stmt
    }
}
