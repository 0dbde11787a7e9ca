// 🚨 Error taxonomy for the ingestion + analytics pipeline
//
// One enum for the whole library. The binary wraps it in anyhow.

use thiserror::Error;

use crate::analytics::Stage;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed schema config. Fatal: nothing is created.
    #[error("config error: {0}")]
    Config(String),

    /// A source record (or a whole batch file) does not have the expected shape.
    #[error("format error in {source_name}: {message}")]
    Format { source_name: String, message: String },

    /// A measurement batch whose original id has no lineage entry.
    #[error("unresolved lineage: no sub-item recorded for original id `{0}`")]
    UnresolvedLineage(String),

    /// DDL or DML failure against a store.
    #[error("schema operation failed on store `{store}`: {source} (statement: {statement}; columns: {columns:?})")]
    SchemaOperation {
        store: String,
        statement: String,
        columns: Vec<String>,
        #[source]
        source: rusqlite::Error,
    },

    #[error("table `{table}` is not registered in store `{store}`")]
    UnknownTable { store: String, table: String },

    #[error("unknown column `{column}` for table `{table}` in store `{store}` (known: {known:?})")]
    UnknownColumn {
        store: String,
        table: String,
        column: String,
        known: Vec<String>,
    },

    #[error("store `{0}` is not registered")]
    StoreNotFound(String),

    /// An analytics stage was invoked before its prerequisite stage.
    #[error("stage `{requested}` requires `{required}` to have run first (engine is at `{current}`)")]
    StageOrder {
        requested: Stage,
        required: Stage,
        current: Stage,
    },

    /// A stage failed; earlier stages' committed output is untouched.
    #[error("stage `{stage}` failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("could not parse date `{0}`")]
    DateParse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn format(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Format {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// True for errors that only invalidate one batch or record, not the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Format { .. } | Error::UnresolvedLineage(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
