// 📚 Reference data - abbreviation glossary for the master store
//
// Types in use: Flavor, Location, Development, Administrative, Exception.

use crate::db::{Datastore, Frame, LoadMode};
use crate::error::{Error, Result};
use crate::identity::IdMinter;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::info;

pub const REFERENCE_TABLE: &str = "reference";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub abbreviation: String,
    pub definition: String,
    #[serde(rename = "type")]
    pub kind: String,
}

pub fn read_reference<R: Read>(reader: R) -> Result<Vec<ReferenceEntry>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut entries = Vec::new();
    for result in rdr.deserialize::<ReferenceEntry>() {
        entries.push(result?);
    }
    Ok(entries)
}

pub fn read_reference_file(path: &Path) -> Result<Vec<ReferenceEntry>> {
    if path.extension().and_then(|e| e.to_str()) != Some("csv") {
        return Err(Error::Config(format!(
            "reference data must be a CSV file, not {}",
            path.display()
        )));
    }
    read_reference(std::fs::File::open(path)?)
}

/// Mint an id per entry and replace the store's reference table
pub fn upload_reference(
    store: &mut Datastore,
    entries: &[ReferenceEntry],
    minter: &mut impl IdMinter,
) -> Result<usize> {
    let mut frame = Frame::new(["id", "abbreviation", "definition", "type"]);
    for entry in entries {
        frame.push_row(vec![
            Value::Text(minter.mint()),
            Value::Text(entry.abbreviation.clone()),
            Value::Text(entry.definition.clone()),
            Value::Text(entry.kind.clone()),
        ])?;
    }

    let n = store.bulk_load(REFERENCE_TABLE, &frame, LoadMode::Replace)?;
    info!(store = %store.name(), rows = n, "uploaded reference data");
    Ok(n)
}
