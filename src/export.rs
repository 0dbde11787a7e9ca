// 📤 Flat-file export - one CSV per table, named by run timestamp
//
// Layout:
//   <export_dir>/<table>/<timestamp>.csv
//   <export_dir>/<timestamp>_manifest.json

use crate::error::Result;
use crate::registry::DatastoreRegistry;
use chrono::{DateTime, Local};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn run_timestamp(now: DateTime<Local>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Tables to export from one store; empty means every registered table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSelection {
    pub store: String,
    pub tables: Vec<String>,
}

impl ExportSelection {
    pub fn all(store: impl Into<String>) -> Self {
        ExportSelection {
            store: store.into(),
            tables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedTable {
    pub store: String,
    pub table: String,
    pub rows: usize,
    pub file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub timestamp: String,
    pub tables: Vec<ExportedTable>,
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => b.iter().map(|byte| format!("{:02x}", byte)).collect(),
    }
}

pub fn export_tables(
    registry: &DatastoreRegistry,
    selections: &[ExportSelection],
    export_dir: &Path,
    timestamp: &str,
) -> Result<ExportManifest> {
    let mut manifest = ExportManifest {
        timestamp: timestamp.to_string(),
        tables: Vec::new(),
    };

    for selection in selections {
        let store = registry.get(&selection.store)?;
        let tables: Vec<String> = if selection.tables.is_empty() {
            store.table_names().into_iter().map(str::to_string).collect()
        } else {
            selection.tables.clone()
        };

        for table in tables {
            let frame = store.get_data(&["*"], &table, &[])?;

            let dir = export_dir.join(&table);
            std::fs::create_dir_all(&dir)?;
            let file = dir.join(format!("{}.csv", timestamp));

            let mut wtr = csv::Writer::from_path(&file)?;
            wtr.write_record(&frame.columns)?;
            for row in &frame.rows {
                wtr.write_record(row.iter().map(cell))?;
            }
            wtr.flush()?;

            info!(store = %selection.store, table = %table, rows = frame.len(), file = %file.display(), "exported table");
            manifest.tables.push(ExportedTable {
                store: selection.store.clone(),
                table,
                rows: frame.len(),
                file,
            });
        }
    }

    std::fs::create_dir_all(export_dir)?;
    let manifest_path = export_dir.join(format!("{}_manifest.json", timestamp));
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
    info!(path = %manifest_path.display(), tables = manifest.tables.len(), "wrote export manifest");

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Datastore, Frame, LoadMode};
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_timestamp_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(run_timestamp(at), "20240305_140709");
    }

    #[test]
    fn test_export_writes_csv_and_manifest() {
        let dir = tempdir().unwrap();
        let mut store = Datastore::new("dynamic_analyses", &dir.path().join("db"));
        std::fs::create_dir_all(dir.path().join("db")).unwrap();

        let mut frame = Frame::new(["category", "total_purchased", "average_pmr"]);
        frame
            .push_row(vec![Value::Text("PSF".into()), Value::Integer(2), Value::Null])
            .unwrap();
        store.bulk_load("category_analysis", &frame, LoadMode::Replace).unwrap();

        let mut registry = DatastoreRegistry::new();
        registry.register(store);

        let out = dir.path().join("export");
        let manifest = export_tables(
            &registry,
            &[ExportSelection::all("dynamic_analyses")],
            &out,
            "20240305_140709",
        )
        .unwrap();

        assert_eq!(manifest.tables.len(), 1);
        assert_eq!(manifest.tables[0].rows, 1);

        let csv = std::fs::read_to_string(out.join("category_analysis").join("20240305_140709.csv")).unwrap();
        assert_eq!(csv, "category,total_purchased,average_pmr\nPSF,2,\n");

        let json = std::fs::read_to_string(out.join("20240305_140709_manifest.json")).unwrap();
        let parsed: ExportManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, manifest);
    }
}
