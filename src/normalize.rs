// 🧹 Source Normalizer - legacy CSV + markdown exports → canonical rows
//
// Two source shapes, one canonical output:
// - CSV legacy: `csv_raw/box_data.csv` (one row per tracked variant) plus
//   `csv_raw/can_data_by_box/<original_id>.csv` (one file of measurements per variant)
// - Markdown export: `md_raw/can_data_by_box/<original_id> <title>.md`, a block
//   of `key: value` properties followed by a pipe-table of measurements
//
// A malformed measurement table invalidates that file's batch only. Callers
// get the error back in `NormalizedSources::format_errors`.

use crate::error::{Error, Result};
use chrono::NaiveDate;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Values treated as "no value" in every source
pub const EMPTY_VALUES: [&str; 3] = ["NA", "", "nan"];

/// Positional layout of a CSV measurement file
pub const CSV_MEASUREMENT_HEADER: [&str; 6] = [
    "sequence",
    "initial_mass",
    "initial_volume",
    "final_mass",
    "final_volume",
    "finish_status",
];

/// Positional layout of a markdown measurement table. The trailing weighed
/// empty can is optional; older exports stop at `finish_status`.
pub const MARKDOWN_MEASUREMENT_HEADER: [&str; 7] = [
    "sequence",
    "initial_mass",
    "initial_volume",
    "final_mass",
    "final_volume",
    "finish_status",
    "empty_can_mass",
];

/// Positional layout of the legacy purchase CSV (the last two columns are
/// spreadsheet-computed and ignored)
const CSV_PURCHASE_HEADER: [&str; 9] = [
    "original_id",
    "category",
    "acquired_at",
    "price",
    "channel",
    "started_at",
    "finished_at",
    "DV",
    "TTS",
];

/// Markdown property names → canonical names (keys compared lowercased)
const MARKDOWN_RENAMES: [(&str, &str); 6] = [
    ("purchased", "acquired_at"),
    ("started", "started_at"),
    ("finished", "finished_at"),
    ("flavor", "category"),
    ("location", "channel"),
    ("price", "price"),
];

// ============================================================================
// SOURCE KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Csv,
    Markdown,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Csv => "CSV",
            SourceKind::Markdown => "MD",
        }
    }

    pub fn measurement_header(&self) -> &'static [&'static str] {
        match self {
            SourceKind::Csv => &CSV_MEASUREMENT_HEADER,
            SourceKind::Markdown => &MARKDOWN_MEASUREMENT_HEADER,
        }
    }

    /// Columns every measurement row must carry
    pub fn required_measurement_columns(&self) -> usize {
        CSV_MEASUREMENT_HEADER.len()
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CANONICAL SHAPES
// ============================================================================

/// One tracked variant as read from a source, before ids are minted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    pub kind: SourceKind,
    pub source_name: String,
    pub original_id: String,
    /// Grouping key for multi-variant packs (`12PSF2` → `12PSF`)
    pub base_original_id: String,
    pub category: Option<String>,
    pub acquired_at: Option<NaiveDate>,
    pub price: Option<f64>,
    pub channel: Option<String>,
    pub started_at: Option<NaiveDate>,
    pub finished_at: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRow {
    /// Position of the unit within its variant (`1`, `2`, ...)
    pub sequence: String,
    pub initial_mass: Option<f64>,
    pub initial_volume: Option<f64>,
    pub final_mass: Option<f64>,
    pub final_volume: Option<f64>,
    pub finish_status: Option<String>,
    pub empty_can_mass: Option<f64>,
}

/// All measurements from one source file, keyed by the variant's original id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementBatch {
    pub kind: SourceKind,
    pub original_id: String,
    pub source_name: String,
    pub rows: Vec<MeasurementRow>,
}

/// Parsed markdown export: properties + the raw pipe-table (header first)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkdownRecord {
    pub properties: IndexMap<String, String>,
    pub table: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Default)]
pub struct NormalizedSources {
    pub rows: Vec<SourceRow>,
    pub batches: Vec<MeasurementBatch>,
    /// Recoverable per-file/per-record failures
    pub format_errors: Vec<Error>,
}

impl NormalizedSources {
    pub fn extend(&mut self, other: NormalizedSources) {
        self.rows.extend(other.rows);
        self.batches.extend(other.batches);
        self.format_errors.extend(other.format_errors);
    }
}

// ============================================================================
// VALUE COERCION
// ============================================================================

/// Trimmed value, or `None` for any of the empty markers
pub fn clean(value: &str) -> Option<String> {
    let value = value.trim();
    if EMPTY_VALUES.contains(&value) {
        None
    } else {
        Some(value.to_string())
    }
}

/// `MM/DD/YYYY`, `Month DD, YYYY` or ISO → date. Empty markers → `None`.
pub fn parse_date(value: &str) -> Result<Option<NaiveDate>> {
    let Some(value) = clean(value) else {
        return Ok(None);
    };

    let parsed = if value.contains('/') {
        NaiveDate::parse_from_str(&value, "%m/%d/%Y")
    } else if value.contains(',') {
        NaiveDate::parse_from_str(&value, "%B %d, %Y")
    } else {
        NaiveDate::parse_from_str(&value, "%Y-%m-%d")
    };

    parsed
        .map(Some)
        .map_err(|_| Error::DateParse(value))
}

fn parse_number(source_name: &str, field: &str, value: &str) -> Result<Option<f64>> {
    match clean(value) {
        None => Ok(None),
        Some(v) => v
            .trim_start_matches('$')
            .parse::<f64>()
            .map(Some)
            .map_err(|_| Error::format(source_name, format!("`{}` is not a number: `{}`", field, v))),
    }
}

/// Split one `| a | b |` line into trimmed cells
fn split_pipe_row(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

/// Property block + first pipe-table of a markdown export.
///
/// Property lines are `key: value` before the table. The table runs from the
/// first line starting with `|` up to the first line that does not.
pub fn parse_markdown(content: &str) -> MarkdownRecord {
    let mut record = MarkdownRecord::default();
    let mut table: Vec<Vec<String>> = Vec::new();
    let mut in_table = false;

    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('|') {
            in_table = true;
            table.push(split_pipe_row(trimmed));
            continue;
        }
        if in_table {
            break;
        }
        if let Some((key, value)) = line.split_once(": ") {
            record
                .properties
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    if !table.is_empty() {
        record.table = Some(table);
    }
    record
}

/// Table data rows (header and `|---|` separator already stripped) → measurements
pub fn measurement_rows(
    kind: SourceKind,
    source_name: &str,
    data_rows: &[Vec<String>],
) -> Result<Vec<MeasurementRow>> {
    let header = kind.measurement_header();
    let required = kind.required_measurement_columns();
    let mut rows = Vec::with_capacity(data_rows.len());

    for (i, cells) in data_rows.iter().enumerate() {
        if cells.len() < required || cells.len() > header.len() {
            let expected = if required == header.len() {
                required.to_string()
            } else {
                format!("{} or {}", required, header.len())
            };
            return Err(Error::format(
                source_name,
                format!(
                    "measurement row {} has {} columns, expected {} ({})",
                    i + 1,
                    cells.len(),
                    expected,
                    header.join(", ")
                ),
            ));
        }

        let sequence = clean(&cells[0]).ok_or_else(|| {
            Error::format(source_name, format!("measurement row {} has no sequence", i + 1))
        })?;

        rows.push(MeasurementRow {
            sequence,
            initial_mass: parse_number(source_name, header[1], &cells[1])?,
            initial_volume: parse_number(source_name, header[2], &cells[2])?,
            final_mass: parse_number(source_name, header[3], &cells[3])?,
            final_volume: parse_number(source_name, header[4], &cells[4])?,
            finish_status: clean(&cells[5]),
            empty_can_mass: match cells.get(6) {
                Some(v) => parse_number(source_name, header[6], v)?,
                None => None,
            },
        });
    }

    Ok(rows)
}

// ============================================================================
// NORMALIZER
// ============================================================================

pub struct SourceNormalizer {
    raw_data_dir: PathBuf,
    /// leading digits + letter run of an original id
    base_id_pattern: Regex,
}

impl SourceNormalizer {
    pub fn new(raw_data_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(SourceNormalizer {
            raw_data_dir: raw_data_dir.into(),
            base_id_pattern: Regex::new(r"^(\d+)([A-Za-z]+)")
                .map_err(|e| Error::Config(e.to_string()))?,
        })
    }

    pub fn csv_purchase_path(&self) -> PathBuf {
        self.raw_data_dir.join("csv_raw").join("box_data.csv")
    }

    pub fn csv_measurement_dir(&self) -> PathBuf {
        self.raw_data_dir.join("csv_raw").join("can_data_by_box")
    }

    pub fn markdown_dir(&self) -> PathBuf {
        self.raw_data_dir.join("md_raw").join("can_data_by_box")
    }

    /// `12PSF2` → `12PSF`; ids without a leading number + letters are a format error
    pub fn base_original_id(&self, original_id: &str) -> Result<String> {
        let caps = self.base_id_pattern.captures(original_id.trim()).ok_or_else(|| {
            Error::format(
                original_id,
                "original id must start with a number followed by letters",
            )
        })?;
        Ok(format!("{}{}", &caps[1], &caps[2]))
    }

    /// Canonical-key field map → row
    fn source_row(
        &self,
        kind: SourceKind,
        source_name: &str,
        fields: &IndexMap<String, String>,
    ) -> Result<SourceRow> {
        let field = |name: &str| fields.get(name).map(String::as_str).unwrap_or("");

        let original_id = clean(field("original_id"))
            .ok_or_else(|| Error::format(source_name, "missing original id"))?;
        let date = |name: &str| {
            parse_date(field(name)).map_err(|e| Error::format(source_name, e.to_string()))
        };

        Ok(SourceRow {
            kind,
            source_name: source_name.to_string(),
            base_original_id: self.base_original_id(&original_id)?,
            original_id,
            category: clean(field("category")),
            acquired_at: date("acquired_at")?,
            price: parse_number(source_name, "price", field("price"))?,
            channel: clean(field("channel")),
            started_at: date("started_at")?,
            finished_at: date("finished_at")?,
        })
    }

    // ------------------------------------------------------------------------
    // CSV legacy
    // ------------------------------------------------------------------------

    /// Purchase CSV. The file's own header line is skipped; columns are read
    /// by position. Bad records are returned as errors, not fatal.
    pub fn read_csv_purchases<R: std::io::Read>(
        &self,
        source_name: &str,
        reader: R,
    ) -> Result<(Vec<SourceRow>, Vec<Error>)> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut rows = Vec::new();
        let mut errors = Vec::new();

        for (idx, record) in rdr.records().enumerate() {
            let name = format!("{}:{}", source_name, idx + 2);
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!(source = %name, error = %e, "unreadable purchase record");
                    errors.push(Error::format(&name, e.to_string()));
                    continue;
                }
            };

            if record.len() < 7 {
                errors.push(Error::format(
                    &name,
                    format!("expected at least 7 columns, found {}", record.len()),
                ));
                continue;
            }

            let fields: IndexMap<String, String> = CSV_PURCHASE_HEADER
                .iter()
                .zip(record.iter())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();

            match self.source_row(SourceKind::Csv, &name, &fields) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!(source = %name, error = %e, "skipping purchase record");
                    errors.push(e);
                }
            }
        }

        Ok((rows, errors))
    }

    /// One `<original_id>.csv` measurement file
    pub fn read_csv_measurements(&self, path: &Path) -> Result<MeasurementBatch> {
        let source_name = path.display().to_string();
        let original_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::trim)
            .ok_or_else(|| Error::format(&source_name, "file name is not an original id"))?
            .to_string();

        let unreadable = |e: csv::Error| Error::format(&source_name, e.to_string());
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(unreadable)?;

        let data: Vec<Vec<String>> = rdr
            .records()
            .map(|r| r.map(|rec| rec.iter().map(str::to_string).collect()))
            .collect::<std::result::Result<_, _>>()
            .map_err(unreadable)?;

        Ok(MeasurementBatch {
            kind: SourceKind::Csv,
            rows: measurement_rows(SourceKind::Csv, &source_name, &data)?,
            original_id,
            source_name,
        })
    }

    // ------------------------------------------------------------------------
    // Markdown export
    // ------------------------------------------------------------------------

    /// Properties → canonical field map. Keys are lowercased, the known
    /// property names renamed, anything else ignored.
    fn markdown_fields(&self, original_id: &str, properties: &IndexMap<String, String>) -> IndexMap<String, String> {
        let mut fields = IndexMap::new();
        fields.insert("original_id".to_string(), original_id.to_string());

        for (key, value) in properties {
            let key = key.to_lowercase();
            if let Some((_, canonical)) = MARKDOWN_RENAMES.iter().find(|(from, _)| *from == key) {
                fields.insert(canonical.to_string(), value.clone());
            }
        }
        fields
    }

    /// One markdown export → its variant row + (optional) measurement batch.
    ///
    /// A malformed measurement table is returned as the batch's error; the
    /// variant row itself is still usable.
    pub fn read_markdown(
        &self,
        file_name: &str,
        content: &str,
    ) -> Result<(SourceRow, Option<Result<MeasurementBatch>>)> {
        let original_id = file_name
            .split(' ')
            .next()
            .map(|s| s.trim_end_matches(".md").to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::format(file_name, "file name does not start with an original id"))?;

        let record = parse_markdown(content);
        let fields = self.markdown_fields(&original_id, &record.properties);
        let row = self.source_row(SourceKind::Markdown, file_name, &fields)?;

        let batch = record.table.map(|table| {
            // header, separator, data...
            let data = table.get(2..).unwrap_or(&[]);
            measurement_rows(SourceKind::Markdown, file_name, data).map(|rows| MeasurementBatch {
                kind: SourceKind::Markdown,
                original_id: original_id.clone(),
                source_name: file_name.to_string(),
                rows,
            })
        });

        Ok((row, batch))
    }

    // ------------------------------------------------------------------------
    // Directory readers
    // ------------------------------------------------------------------------

    fn sorted_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(extension))
            .collect();
        files.sort();
        Ok(files)
    }

    pub fn normalize_csv(&self) -> Result<NormalizedSources> {
        let mut out = NormalizedSources::default();

        let purchase_path = self.csv_purchase_path();
        if purchase_path.is_file() {
            let file = std::fs::File::open(&purchase_path)?;
            let (rows, errors) =
                self.read_csv_purchases(&purchase_path.display().to_string(), file)?;
            out.rows = rows;
            out.format_errors = errors;
        } else {
            warn!(path = %purchase_path.display(), "no legacy purchase CSV");
        }

        let measurement_dir = self.csv_measurement_dir();
        if measurement_dir.is_dir() {
            for path in Self::sorted_files(&measurement_dir, "csv")? {
                match self.read_csv_measurements(&path) {
                    Ok(batch) => {
                        debug!(source = %batch.source_name, rows = batch.rows.len(), "read measurement batch");
                        out.batches.push(batch);
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(path = %path.display(), error = %e, "skipping measurement file");
                        out.format_errors.push(e);
                    }
                    Err(e) => return Err(e),
                }
            }
        } else {
            warn!(dir = %measurement_dir.display(), "no legacy measurement directory");
        }

        info!(
            rows = out.rows.len(),
            batches = out.batches.len(),
            errors = out.format_errors.len(),
            "normalized CSV sources"
        );
        Ok(out)
    }

    pub fn normalize_markdown(&self) -> Result<NormalizedSources> {
        let mut out = NormalizedSources::default();

        let dir = self.markdown_dir();
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "no markdown export directory");
            return Ok(out);
        }

        for path in Self::sorted_files(&dir, "md")? {
            let file_name = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(source = %file_name, error = %e, "unreadable markdown export");
                    out.format_errors.push(Error::format(&file_name, e.to_string()));
                    continue;
                }
            };

            match self.read_markdown(&file_name, &content) {
                Ok((row, batch)) => {
                    out.rows.push(row);
                    match batch {
                        Some(Ok(batch)) => out.batches.push(batch),
                        Some(Err(e)) => {
                            warn!(source = %file_name, error = %e, "skipping measurement table");
                            out.format_errors.push(e);
                        }
                        None => debug!(source = %file_name, "no measurement table"),
                    }
                }
                Err(e) if e.is_recoverable() => {
                    warn!(source = %file_name, error = %e, "skipping markdown export");
                    out.format_errors.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            rows = out.rows.len(),
            batches = out.batches.len(),
            errors = out.format_errors.len(),
            "normalized markdown sources"
        );
        Ok(out)
    }

    /// CSV legacy first, then markdown exports
    pub fn normalize(&self) -> Result<NormalizedSources> {
        let mut out = self.normalize_csv()?;
        out.extend(self.normalize_markdown()?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MARKDOWN: &str = "\
# 12PSF2 Pamplemousse

Flavor: PSF
Location: CCO
Price: 15.99
Purchased: March 3, 2024
Started: 03/05/2024
Finished: NA
Tracking: Yes

| Can | Initial Mass | Initial Volume | Final Mass | Final Volume | Status | Empty |
| --- | --- | --- | --- | --- | --- | --- |
| 1 | 370 | 12 | 15 | 0.2 | finished | 14 |
| 2 | 371 | 12 |  | NA | open |  |

Notes below the table are ignored.
";

    fn normalizer(dir: &Path) -> SourceNormalizer {
        SourceNormalizer::new(dir).unwrap()
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert_eq!(parse_date("03/05/2024").unwrap(), expected);
        assert_eq!(parse_date("March 5, 2024").unwrap(), expected);
        assert_eq!(parse_date("2024-03-05").unwrap(), expected);
        assert_eq!(parse_date("NA").unwrap(), None);
        assert_eq!(parse_date(" ").unwrap(), None);
        assert!(matches!(parse_date("soon"), Err(Error::DateParse(_))));
    }

    #[test]
    fn test_base_original_id() {
        let n = SourceNormalizer::new("raw").unwrap();
        assert_eq!(n.base_original_id("12PSF2").unwrap(), "12PSF");
        assert_eq!(n.base_original_id("7LIM").unwrap(), "7LIM");
        assert!(n.base_original_id("PSF12").is_err());
    }

    #[test]
    fn test_parse_markdown_properties_and_table() {
        let record = parse_markdown(MARKDOWN);
        assert_eq!(record.properties["Flavor"], "PSF");
        assert_eq!(record.properties["Purchased"], "March 3, 2024");

        let table = record.table.unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table[0][0], "Can");
        assert_eq!(table[3][3], "");
    }

    #[test]
    fn test_read_markdown_renames_and_discards_separator() {
        let n = SourceNormalizer::new("raw").unwrap();
        let (row, batch) = n.read_markdown("12PSF2 Pamplemousse.md", MARKDOWN).unwrap();

        assert_eq!(row.kind, SourceKind::Markdown);
        assert_eq!(row.original_id, "12PSF2");
        assert_eq!(row.base_original_id, "12PSF");
        assert_eq!(row.category.as_deref(), Some("PSF"));
        assert_eq!(row.channel.as_deref(), Some("CCO"));
        assert_eq!(row.price, Some(15.99));
        assert_eq!(row.acquired_at, NaiveDate::from_ymd_opt(2024, 3, 3));
        assert_eq!(row.started_at, NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(row.finished_at, None);

        let batch = batch.unwrap().unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rows[0].sequence, "1");
        assert_eq!(batch.rows[0].empty_can_mass, Some(14.0));
        assert_eq!(batch.rows[1].final_mass, None);
        assert_eq!(batch.rows[1].final_volume, None);
    }

    #[test]
    fn test_markdown_table_without_empty_can_column() {
        let md = "\
Flavor: PSF
Location: TGT

| Can | Initial Mass | Initial Volume | Final Mass | Final Volume | Status |
| --- | --- | --- | --- | --- | --- |
| 1 | 370 | 12 | 15 | 0.2 | finished |
| 2 | 371 | 12 | 200 | 6 | open |
";
        let n = SourceNormalizer::new("raw").unwrap();
        let (_, batch) = n.read_markdown("5PSF Pamplemousse.md", md).unwrap();

        let batch = batch.unwrap().unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rows[0].final_mass, Some(15.0));
        assert_eq!(batch.rows[0].empty_can_mass, None);
        assert_eq!(batch.rows[1].finish_status.as_deref(), Some("open"));

        // eight columns is still too many
        let wide = md.replace("| 1 | 370 | 12 | 15 | 0.2 | finished |", "| 1 | 370 | 12 | 15 | 0.2 | finished | 14 | 9 |");
        let (_, batch) = n.read_markdown("5PSF Pamplemousse.md", &wide).unwrap();
        assert!(matches!(batch, Some(Err(Error::Format { .. }))));

        // CSV files never carry the empty can
        let seven = vec!["1", "370", "12", "15", "0.2", "finished", "14"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        assert!(measurement_rows(SourceKind::Csv, "5PSF.csv", &[seven]).is_err());
    }

    #[test]
    fn test_column_count_mismatch_is_format_error() {
        let rows = vec![vec!["1".to_string(), "370".to_string(), "12".to_string()]];
        let err = measurement_rows(SourceKind::Csv, "3LIM.csv", &rows).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
        assert!(err.is_recoverable());

        let md = MARKDOWN.replace("| 1 | 370 | 12 | 15 | 0.2 | finished | 14 |", "| 1 | 370 |");
        let n = SourceNormalizer::new("raw").unwrap();
        let (row, batch) = n.read_markdown("12PSF2 x.md", &md).unwrap();
        assert_eq!(row.original_id, "12PSF2");
        assert!(matches!(batch, Some(Err(Error::Format { .. }))));
    }

    #[test]
    fn test_read_csv_purchases() {
        let csv = "\
og_id,flavor,purchase_date,price,location,start_date,finish_date,DV,TTS
3LIM,LIM,01/02/2023,5.49,TGT,01/04/2023,01/20/2023,16,2
4PSF1,PSF,01/10/2023,NA,CCO,NA,NA,,
bad,PSF,01/10/2023,1,CCO,,,,
";
        let n = SourceNormalizer::new("raw").unwrap();
        let (rows, errors) = n.read_csv_purchases("box_data.csv", csv.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(rows[0].category.as_deref(), Some("LIM"));
        assert_eq!(rows[0].price, Some(5.49));
        assert_eq!(rows[1].base_original_id, "4PSF");
        assert_eq!(rows[1].price, None);
        assert_eq!(rows[1].started_at, None);
    }

    #[test]
    fn test_normalize_reads_both_source_trees() {
        let dir = tempdir().unwrap();
        let n = normalizer(dir.path());

        std::fs::create_dir_all(n.csv_measurement_dir()).unwrap();
        std::fs::create_dir_all(n.markdown_dir()).unwrap();
        std::fs::write(
            n.csv_purchase_path(),
            "og_id,flavor,purchase_date,price,location,start_date,finish_date,DV,TTS\n\
             3LIM,LIM,01/02/2023,5.49,TGT,01/04/2023,01/20/2023,16,2\n",
        )
        .unwrap();
        std::fs::write(
            n.csv_measurement_dir().join("3LIM.csv"),
            "can_id,initial_mass,initial_volume,final_mass,final_volume,finish_status\n\
             1,370,12,20,0.1,finished\n\
             2,368,12,NA,NA,\n",
        )
        .unwrap();
        std::fs::write(
            n.csv_measurement_dir().join("9ABC.csv"),
            "can_id,initial_mass\n1,370\n",
        )
        .unwrap();
        std::fs::write(n.markdown_dir().join("12PSF2 Pamplemousse.md"), MARKDOWN).unwrap();

        let sources = n.normalize().unwrap();
        assert_eq!(sources.rows.len(), 2);
        assert_eq!(sources.rows[0].kind, SourceKind::Csv);
        assert_eq!(sources.rows[1].kind, SourceKind::Markdown);

        // 9ABC.csv is malformed; its siblings still load
        assert_eq!(sources.batches.len(), 2);
        assert_eq!(sources.format_errors.len(), 1);
        assert_eq!(sources.batches[0].original_id, "3LIM");
        assert_eq!(sources.batches[0].rows[1].final_mass, None);
    }

    #[test]
    fn test_unreadable_files_do_not_abort_the_run() {
        let dir = tempdir().unwrap();
        let n = normalizer(dir.path());
        std::fs::create_dir_all(n.csv_measurement_dir()).unwrap();
        std::fs::create_dir_all(n.markdown_dir()).unwrap();

        let not_utf8: &[u8] = b"can_id,initial_mass\n1,\xff\xfe\n";
        std::fs::write(
            n.csv_measurement_dir().join("3LIM.csv"),
            "can_id,initial_mass,initial_volume,final_mass,final_volume,finish_status\n\
             1,370,12,20,0.1,finished\n",
        )
        .unwrap();
        std::fs::write(n.csv_measurement_dir().join("4LIM.csv"), not_utf8).unwrap();
        std::fs::write(n.markdown_dir().join("12PSF2 Pamplemousse.md"), MARKDOWN).unwrap();
        std::fs::write(n.markdown_dir().join("13PSF1 Broken.md"), not_utf8).unwrap();

        let sources = n.normalize().unwrap();
        assert_eq!(sources.rows.len(), 1);
        assert_eq!(sources.rows[0].original_id, "12PSF2");
        assert_eq!(sources.batches.len(), 2);
        assert_eq!(sources.format_errors.len(), 2);
        assert!(sources.format_errors.iter().all(Error::is_recoverable));
    }

    #[test]
    fn test_unreadable_purchase_record_is_skipped() {
        let mut csv = b"og_id,flavor,purchase_date,price,location,start_date,finish_date,DV,TTS\n".to_vec();
        csv.extend_from_slice(b"3LIM,LIM,01/02/2023,5.49,TGT,01/04/2023,01/20/2023,16,2\n");
        csv.extend_from_slice(b"4LIM,\xff,01/02/2023,5.49,TGT,,,,\n");
        csv.extend_from_slice(b"5LIM,LIM,01/03/2023,5.49,TGT,,,,\n");

        let n = SourceNormalizer::new("raw").unwrap();
        let (rows, errors) = n.read_csv_purchases("box_data.csv", csv.as_slice()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].original_id, "5LIM");
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], Error::Format { source_name, .. } if source_name == "box_data.csv:3"));
    }

    #[test]
    fn test_missing_directories_are_empty() {
        let dir = tempdir().unwrap();
        let sources = normalizer(dir.path()).normalize().unwrap();
        assert!(sources.rows.is_empty());
        assert!(sources.batches.is_empty());
    }
}
