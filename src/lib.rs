// Can Tracker - Core Library
// Raw purchase/measurement exports → relational stores → derived metrics

pub mod error;
pub mod config;     // Schema config (database → table → columns)
pub mod schema;     // DDL from column specs
pub mod db;         // One store: scoped connections, header registry
pub mod registry;   // Fleet of stores
pub mod normalize;  // CSV legacy + markdown exports → canonical rows
pub mod entities;   // Purchase → SubItem → Measurement
pub mod identity;   // Surrogate ids + lineage map
pub mod analytics;  // Measurement → sub-item → category stages
pub mod stats;
pub mod reference;
pub mod export;
pub mod settings;
pub mod pipeline;

// Re-export commonly used types
pub use error::{Error, Result};
pub use config::{ColumnSpec, DatabaseSchema, ForeignKey, SchemaConfig};
pub use db::{Datastore, Frame, LoadMode};
pub use registry::DatastoreRegistry;
pub use normalize::{MeasurementBatch, SourceKind, SourceNormalizer, SourceRow};
pub use entities::{EntityKind, Measurement, Purchase, Record, SubItem};
pub use identity::{IdMinter, IdentityResolver, LineageMap, RandomIds, SeededIds};
pub use analytics::{AnalysisParams, AnalysisStores, AnalyticsEngine, Calibration, Stage};
pub use stats::{CountCheck, CountStatus, RunStats, UnitExpectations};
pub use export::{ExportManifest, ExportSelection};
pub use settings::Settings;
pub use pipeline::IngestReport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
