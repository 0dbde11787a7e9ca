// 📋 Schema Config - tabular spec → ordered database/table/column map
//
// Input rows: database_name, table_name, header, header_data_type, foreign_key
//
// Row order is load-bearing. Databases and tables keep the order in which they
// are first seen, because a table's foreign keys may only point at tables
// declared before it.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

// ============================================================================
// COLUMN SPEC
// ============================================================================

/// `"<referenced_table>;<referenced_column>"` from the config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

impl ForeignKey {
    /// Parse a foreign-key cell. Empty (or `;`-free) cells mean "no foreign key".
    pub fn parse(cell: &str) -> Result<Option<ForeignKey>> {
        let cell = cell.trim();
        if !cell.contains(';') {
            return Ok(None);
        }

        let parts: Vec<&str> = cell.split(';').map(str::trim).collect();
        match parts.as_slice() {
            [table, column] if !table.is_empty() && !column.is_empty() => Ok(Some(ForeignKey {
                table: table.to_string(),
                column: column.to_string(),
            })),
            _ => Err(Error::Config(format!(
                "malformed foreign key `{}` (expected `table;column`)",
                cell
            ))),
        }
    }
}

/// One row of the config, minus the database/table names it was grouped under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub header: String,
    pub header_data_type: String,
    pub foreign_key: Option<ForeignKey>,
}

/// Ordered `table_name → columns` for one database
pub type DatabaseSchema = IndexMap<String, Vec<ColumnSpec>>;

#[derive(Debug, Deserialize)]
struct ConfigRow {
    database_name: String,
    table_name: String,
    header: String,
    header_data_type: String,
    #[serde(default)]
    foreign_key: Option<String>,
}

// ============================================================================
// SCHEMA CONFIG
// ============================================================================

/// `database_name → table_name → [ColumnSpec]`, all in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaConfig {
    databases: IndexMap<String, DatabaseSchema>,
}

impl SchemaConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            Error::Config(format!("cannot open schema config {}: {}", path.display(), e))
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut databases: IndexMap<String, DatabaseSchema> = IndexMap::new();

        for (idx, result) in rdr.deserialize::<ConfigRow>().enumerate() {
            // +2: header row, 1-indexed
            let line = idx + 2;
            let row = result.map_err(|e| Error::Config(format!("line {}: {}", line, e)))?;

            if row.database_name.is_empty() {
                return Err(Error::Config(format!("line {}: blank database_name", line)));
            }
            if row.table_name.is_empty() {
                return Err(Error::Config(format!("line {}: blank table_name", line)));
            }
            if row.header.is_empty() {
                return Err(Error::Config(format!("line {}: blank header", line)));
            }

            let foreign_key = ForeignKey::parse(row.foreign_key.as_deref().unwrap_or(""))
                .map_err(|e| Error::Config(format!("line {}: {}", line, e)))?;

            let tables = databases.entry(row.database_name.clone()).or_default();

            // Reference must already be declared (or be the table itself)
            if let Some(fk) = &foreign_key {
                if fk.table != row.table_name && !tables.contains_key(&fk.table) {
                    return Err(Error::Config(format!(
                        "line {}: `{}.{}` references `{}` which is not declared earlier in `{}`",
                        line, row.table_name, row.header, fk.table, row.database_name
                    )));
                }
            }

            tables.entry(row.table_name).or_default().push(ColumnSpec {
                header: row.header,
                header_data_type: row.header_data_type,
                foreign_key,
            });
        }

        Ok(SchemaConfig { databases })
    }

    /// Database names in declaration order
    pub fn database_names(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseSchema> {
        self.databases.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DatabaseSchema)> {
        self.databases.iter()
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }
}
