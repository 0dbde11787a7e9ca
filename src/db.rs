// 🗄️ Datastore - one physical SQLite file + its table/header registry
//
// Every operation opens a connection, runs inside a transaction, commits and
// drops the connection before returning. Nothing is held between calls; an
// early `?` drops the transaction (rollback) and the connection (close).

use crate::config::DatabaseSchema;
use crate::error::{Error, Result};
use crate::schema;
use indexmap::IndexMap;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// File extension used for store files on disk
pub const STORE_EXTENSION: &str = "db";

// ============================================================================
// LOAD MODE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Clear the table, then insert
    Replace,
    /// Insert after whatever is already there
    Append,
}

// ============================================================================
// FRAME (tabular result / bulk-load input)
// ============================================================================

/// Column names + row values, in column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Frame {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::Invariant(format!(
                "row has {} values but frame has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            Error::Invariant(format!(
                "frame has no column `{}` (columns: {:?})",
                name, self.columns
            ))
        })
    }

    pub fn value(&self, row: usize, col: usize) -> &Value {
        &self.rows[row][col]
    }

    pub fn text(&self, row: usize, col: usize) -> Option<String> {
        match self.value(row, col) {
            Value::Text(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Null | Value::Blob(_) => None,
        }
    }

    pub fn real(&self, row: usize, col: usize) -> Option<f64> {
        match self.value(row, col) {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null | Value::Blob(_) => None,
        }
    }

    pub fn boolean(&self, row: usize, col: usize) -> Option<bool> {
        match self.value(row, col) {
            Value::Integer(i) => Some(*i != 0),
            Value::Real(f) => Some(*f != 0.0),
            Value::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            Value::Null | Value::Blob(_) => None,
        }
    }
}

/// `Option<f64>` → SQL value
pub fn real_value(v: Option<f64>) -> Value {
    v.map(Value::Real).unwrap_or(Value::Null)
}

/// `Option<&str>` → SQL value
pub fn text_value(v: Option<&str>) -> Value {
    v.map(|s| Value::Text(s.to_string())).unwrap_or(Value::Null)
}

pub fn bool_value(v: Option<bool>) -> Value {
    v.map(|b| Value::Integer(b as i64)).unwrap_or(Value::Null)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `"name"` with embedded quotes doubled
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type_of(frame: &Frame, col: usize) -> &'static str {
    frame
        .rows
        .iter()
        .map(|r| &r[col])
        .find(|v| !matches!(v, Value::Null))
        .map(|v| match v {
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Blob(_) => "BLOB",
            _ => "TEXT",
        })
        .unwrap_or("TEXT")
}

// ============================================================================
// DATASTORE
// ============================================================================

/// Handle to one store file. Cheap: holds a path and the header registry.
#[derive(Debug, Clone)]
pub struct Datastore {
    name: String,
    path: PathBuf,
    schema: Option<DatabaseSchema>,
    /// table → ordered header
    tables: IndexMap<String, Vec<String>>,
}

impl Datastore {
    /// Bare handle: no schema, no known tables
    pub fn new(name: impl Into<String>, dir: &Path) -> Self {
        let name = name.into();
        let path = dir.join(format!("{}.{}", name, STORE_EXTENSION));
        Datastore {
            name,
            path,
            schema: None,
            tables: IndexMap::new(),
        }
    }

    pub fn with_schema(name: impl Into<String>, dir: &Path, schema: DatabaseSchema) -> Self {
        let mut store = Datastore::new(name, dir);
        store.attach_schema(schema, true);
        store
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> Option<&DatabaseSchema> {
        self.schema.as_ref()
    }

    pub fn has_schema(&self) -> bool {
        self.schema.is_some()
    }

    /// Registered table names, in registration order
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn header(&self, table: &str) -> Option<&[String]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    /// Attach table config. With `overwrite == false` an existing schema wins
    /// and `false` is returned.
    pub fn attach_schema(&mut self, schema: DatabaseSchema, overwrite: bool) -> bool {
        if self.schema.is_some() && !overwrite {
            warn!(store = %self.name, "schema already attached, keeping existing one");
            return false;
        }

        for (table, columns) in &schema {
            self.tables.insert(
                table.clone(),
                columns.iter().map(|c| c.header.clone()).collect(),
            );
        }
        self.schema = Some(schema);
        debug!(store = %self.name, tables = self.tables.len(), "attached schema");
        true
    }

    /// Rebuild the header registry from the live store (for discovered stores)
    pub fn refresh_headers(&mut self) -> Result<usize> {
        let live = self.list_tables()?;
        let mut found = Vec::with_capacity(live.len());

        for table in live {
            let statement = format!("PRAGMA table_info({})", quote_identifier(&table));
            let header: Vec<String> = self.with_connection(|conn| {
                let mut stmt = conn
                    .prepare(&statement)
                    .map_err(|e| self.op_error(&statement, &[], e))?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(1))
                    .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                    .map_err(|e| self.op_error(&statement, &[], e))?;
                Ok(names)
            })?;
            found.push((table, header));
        }

        let count = found.len();
        for (table, header) in found {
            self.tables.insert(table, header);
        }
        info!(store = %self.name, tables = count, "refreshed headers from store");
        Ok(count)
    }

    // ------------------------------------------------------------------------
    // Connection scope
    // ------------------------------------------------------------------------

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn =
            Connection::open(&self.path).map_err(|e| self.op_error("<open>", &[], e))?;
        let tx = conn
            .transaction()
            .map_err(|e| self.op_error("BEGIN", &[], e))?;
        let out = f(&tx)?;
        tx.commit().map_err(|e| self.op_error("COMMIT", &[], e))?;
        Ok(out)
    }

    fn op_error(&self, statement: &str, columns: &[String], source: rusqlite::Error) -> Error {
        error!(
            store = %self.name,
            statement,
            ?columns,
            error = %source,
            "store operation failed"
        );
        Error::SchemaOperation {
            store: self.name.clone(),
            statement: statement.to_string(),
            columns: columns.to_vec(),
            source,
        }
    }

    fn registered_header(&self, table: &str) -> Result<&Vec<String>> {
        self.tables.get(table).ok_or_else(|| Error::UnknownTable {
            store: self.name.clone(),
            table: table.to_string(),
        })
    }

    fn check_columns<'a>(
        &self,
        table: &str,
        header: &[String],
        columns: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        for column in columns {
            if !header.iter().any(|h| h == column) {
                return Err(Error::UnknownColumn {
                    store: self.name.clone(),
                    table: table.to_string(),
                    column: column.to_string(),
                    known: header.to_vec(),
                });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// `CREATE TABLE IF NOT EXISTS` for every table in the attached schema,
    /// in declaration order, re-registering their headers. Safe to call
    /// repeatedly.
    pub fn create_tables(&mut self) -> Result<usize> {
        let schema = self.schema.as_ref().ok_or_else(|| {
            Error::Config(format!("store `{}` has no schema attached", self.name))
        })?;
        let statements = schema::create_statements(schema);
        let headers: Vec<(String, Vec<String>)> = schema
            .iter()
            .map(|(table, columns)| (table.clone(), columns.iter().map(|c| c.header.clone()).collect()))
            .collect();

        self.with_connection(|tx| {
            for ((_, statement), (_, columns)) in statements.iter().zip(&headers) {
                tx.execute(statement, [])
                    .map_err(|e| self.op_error(statement, columns, e))?;
            }
            Ok(())
        })?;

        for (table, header) in headers {
            self.tables.insert(table, header);
        }

        info!(
            store = %self.name,
            tables = ?statements.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>(),
            "created tables"
        );
        Ok(statements.len())
    }

    /// Tables that physically exist in the store file
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let statement =
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY rowid";
        self.with_connection(|tx| {
            let mut stmt = tx
                .prepare(statement)
                .map_err(|e| self.op_error(statement, &[], e))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .map_err(|e| self.op_error(statement, &[], e))?;
            Ok(names)
        })
    }

    /// Drop every table in the store (children first) and forget their
    /// headers. The attached schema stays; `create_tables` brings it back.
    pub fn drop_tables(&mut self) -> Result<usize> {
        let tables = self.list_tables()?;
        self.with_connection(|tx| {
            for table in tables.iter().rev() {
                let statement = format!("DROP TABLE IF EXISTS {}", quote_identifier(table));
                tx.execute(&statement, [])
                    .map_err(|e| self.op_error(&statement, &[], e))?;
            }
            Ok(())
        })?;
        self.tables.clear();
        info!(store = %self.name, dropped = tables.len(), "removed all tables");
        Ok(tables.len())
    }

    /// Select `columns` (or `["*"]`) from a registered table, optionally
    /// filtered by equality on `filter`. Rows come back in insertion order.
    pub fn get_data(&self, columns: &[&str], table: &str, filter: &[(&str, Value)]) -> Result<Frame> {
        let header = self.registered_header(table)?;

        let selected: Vec<String> = if columns == ["*"] {
            header.clone()
        } else {
            self.check_columns(table, header, columns.iter().copied())?;
            columns.iter().map(|c| c.to_string()).collect()
        };
        self.check_columns(table, header, filter.iter().map(|(c, _)| *c))?;

        let mut statement = format!("SELECT {} FROM {}", selected.join(", "), table);
        if !filter.is_empty() {
            let clauses: Vec<String> = filter
                .iter()
                .enumerate()
                .map(|(i, (c, _))| format!("{} = ?{}", c, i + 1))
                .collect();
            statement.push_str(" WHERE ");
            statement.push_str(&clauses.join(" AND "));
        }
        statement.push_str(" ORDER BY rowid");

        let width = selected.len();
        let rows = self.with_connection(|tx| {
            let mut stmt = tx
                .prepare(&statement)
                .map_err(|e| self.op_error(&statement, &selected, e))?;
            let rows = stmt
                .query_map(params_from_iter(filter.iter().map(|(_, v)| v)), |row| {
                    (0..width)
                        .map(|i| row.get::<_, Value>(i))
                        .collect::<rusqlite::Result<Vec<Value>>>()
                })
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .map_err(|e| self.op_error(&statement, &selected, e))?;
            Ok(rows)
        })?;

        Ok(Frame {
            columns: selected,
            rows,
        })
    }

    /// `UPDATE table SET .. WHERE ..`; returns the number of changed rows
    pub fn update_values(
        &self,
        table: &str,
        set: &[(&str, Value)],
        filter: &[(&str, Value)],
    ) -> Result<usize> {
        if set.is_empty() {
            return Err(Error::Invariant(format!(
                "update on `{}.{}` has nothing to set",
                self.name, table
            )));
        }

        let header = self.registered_header(table)?;
        self.check_columns(table, header, set.iter().map(|(c, _)| *c))?;
        self.check_columns(table, header, filter.iter().map(|(c, _)| *c))?;

        let set_clause: Vec<String> = set
            .iter()
            .enumerate()
            .map(|(i, (c, _))| format!("{} = ?{}", c, i + 1))
            .collect();
        let mut statement = format!("UPDATE {} SET {}", table, set_clause.join(", "));
        if !filter.is_empty() {
            let where_clause: Vec<String> = filter
                .iter()
                .enumerate()
                .map(|(i, (c, _))| format!("{} = ?{}", c, set.len() + i + 1))
                .collect();
            statement.push_str(" WHERE ");
            statement.push_str(&where_clause.join(" AND "));
        }

        let columns: Vec<String> = set
            .iter()
            .chain(filter.iter())
            .map(|(c, _)| c.to_string())
            .collect();
        let params = set.iter().chain(filter.iter()).map(|(_, v)| v);

        let changed = self.with_connection(|tx| {
            tx.execute(&statement, params_from_iter(params))
                .map_err(|e| self.op_error(&statement, &columns, e))
        })?;

        debug!(store = %self.name, table, changed, "updated values");
        Ok(changed)
    }

    /// Write a whole frame into `table`. Unregistered tables are created from
    /// the frame's columns (types inferred from the first non-null value) and
    /// registered.
    pub fn bulk_load(&mut self, table: &str, frame: &Frame, mode: LoadMode) -> Result<usize> {
        let create = match self.tables.get(table) {
            Some(header) => {
                self.check_columns(table, header, frame.columns.iter().map(String::as_str))?;
                None
            }
            None => {
                if !is_identifier(table) {
                    return Err(Error::Config(format!("invalid table name `{}`", table)));
                }
                if let Some(bad) = frame.columns.iter().find(|c| !is_identifier(c)) {
                    return Err(Error::Config(format!(
                        "invalid column name `{}` for table `{}`",
                        bad, table
                    )));
                }
                let defs: Vec<String> = frame
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| format!("{} {}", c, sql_type_of(frame, i)))
                    .collect();
                Some(format!(
                    "CREATE TABLE IF NOT EXISTS {}({})",
                    table,
                    defs.join(", ")
                ))
            }
        };

        let placeholders: Vec<String> = (1..=frame.columns.len()).map(|i| format!("?{}", i)).collect();
        let insert = format!(
            "INSERT INTO {}({}) VALUES({})",
            table,
            frame.columns.join(", "),
            placeholders.join(", ")
        );

        let inserted = self.with_connection(|tx| {
            if let Some(statement) = &create {
                tx.execute(statement, [])
                    .map_err(|e| self.op_error(statement, &frame.columns, e))?;
            }
            if mode == LoadMode::Replace {
                let statement = format!("DELETE FROM {}", table);
                tx.execute(&statement, [])
                    .map_err(|e| self.op_error(&statement, &frame.columns, e))?;
            }

            let mut stmt = tx
                .prepare(&insert)
                .map_err(|e| self.op_error(&insert, &frame.columns, e))?;
            for row in &frame.rows {
                stmt.execute(params_from_iter(row.iter()))
                    .map_err(|e| self.op_error(&insert, &frame.columns, e))?;
            }
            Ok(frame.rows.len())
        })?;

        if create.is_some() {
            self.tables.insert(table.to_string(), frame.columns.clone());
        }

        info!(store = %self.name, table, rows = inserted, ?mode, "bulk loaded");
        Ok(inserted)
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        self.registered_header(table)?;
        let statement = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        self.with_connection(|tx| {
            tx.query_row(&statement, [], |row| row.get(0))
                .map_err(|e| self.op_error(&statement, &[], e))
        })
    }
}
