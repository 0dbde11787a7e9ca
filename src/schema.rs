// 📐 Schema Builder - column specs → CREATE TABLE statements
//
// Pure string construction. Type tokens are uppercased and passed through;
// whether the store understands them is the store's business.

use crate::config::{ColumnSpec, DatabaseSchema};

/// Column-definition + primary-key + foreign-key clauses for one table.
///
/// The first column is always the primary key.
pub fn build_ddl(columns: &[ColumnSpec]) -> String {
    let mut clauses: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", c.header, c.header_data_type.to_uppercase()))
        .collect();

    if let Some(pk) = columns.first() {
        clauses.push(format!("PRIMARY KEY({})", pk.header));
    }

    clauses.extend(columns.iter().filter_map(|c| {
        c.foreign_key.as_ref().map(|fk| {
            format!(
                "FOREIGN KEY({}) REFERENCES {}({})",
                c.header, fk.table, fk.column
            )
        })
    }));

    clauses.join(", ")
}

/// Full idempotent statement for one table
pub fn create_table_statement(table: &str, columns: &[ColumnSpec]) -> String {
    format!("CREATE TABLE IF NOT EXISTS {}({})", table, build_ddl(columns))
}

/// Statements for a whole database, in declaration order
pub fn create_statements(schema: &DatabaseSchema) -> Vec<(String, String)> {
    schema
        .iter()
        .map(|(table, columns)| (table.clone(), create_table_statement(table, columns)))
        .collect()
}
