// 🔄 Pipeline - init → load → analyze
//
// load: raw files → SourceNormalizer → IdentityResolver → combo check →
//       measurement stitching → bulk-load into the raw store
// analyze: calibration refresh → measurement → sub-item → category stages

use crate::analytics::{AnalyticsEngine, Stage};
use crate::config::SchemaConfig;
use crate::db::{Datastore, LoadMode};
use crate::entities::{to_frame, Record};
use crate::error::{Error, Result};
use crate::identity::{stitch_measurements, validate_combo_differential, IdMinter, IdentityResolver};
use crate::normalize::{NormalizedSources, SourceNormalizer};
use crate::reference::{read_reference_file, upload_reference};
use crate::registry::DatastoreRegistry;
use crate::settings::Settings;
use crate::stats::{verify_unit_count, RunStats};
use tracing::{info, warn};

#[derive(Debug)]
pub struct IngestReport {
    pub stats: RunStats,
    /// Files/records rejected by the normalizer
    pub format_errors: Vec<Error>,
    /// Measurement batches with no sub-item
    pub unresolved: Vec<Error>,
}

fn load_records<R: Record>(store: &mut Datastore, records: &[R], mode: LoadMode) -> Result<usize> {
    store.bulk_load(R::KIND.table_name(), &to_frame(records), mode)
}

/// Register every store in the schema config, creating missing tables.
/// Never drops anything.
pub fn open_stores(settings: &Settings, registry: &mut DatastoreRegistry) -> Result<Vec<String>> {
    let config = SchemaConfig::from_path(&settings.schema_config)?;
    registry.create_from_config(&config, &settings.database_dir, false)
}

/// Register (and create) every store in the schema config, then upload
/// reference data into the master store. With `reset`, store files already
/// on disk are picked up and dropped first.
pub fn init_stores(
    settings: &Settings,
    registry: &mut DatastoreRegistry,
    reset: bool,
    minter: &mut impl IdMinter,
) -> Result<Vec<String>> {
    let config = SchemaConfig::from_path(&settings.schema_config)?;
    if reset && settings.database_dir.is_dir() {
        registry.discover(&settings.database_dir)?;
    }
    let created = registry.create_from_config(&config, &settings.database_dir, reset)?;

    if created.iter().any(|s| *s == settings.stores.master) {
        if settings.reference_data.is_file() {
            let entries = read_reference_file(&settings.reference_data)?;
            let master = registry.get_mut(&settings.stores.master)?;
            upload_reference(master, &entries, minter)?;
        } else {
            warn!(path = %settings.reference_data.display(), "no reference data file");
        }
    }

    Ok(created)
}

/// Resolve identities for already-normalized sources and load them into
/// the raw store
pub fn load_sources<M: IdMinter>(
    sources: NormalizedSources,
    settings: &Settings,
    registry: &mut DatastoreRegistry,
    minter: M,
    mode: LoadMode,
) -> Result<IngestReport> {
    let mut resolution = IdentityResolver::new(minter).resolve(&sources.rows);

    validate_combo_differential(
        &resolution.purchases,
        &resolution.sub_items,
        &settings.identity.combo_channel,
        settings.identity.combo_variants,
    )?;

    let stitched = stitch_measurements(&sources.batches, &resolution.lineage, &mut resolution.sub_items);

    let raw = registry.get_mut(&settings.stores.raw)?;
    load_records(raw, &resolution.purchases, mode)?;
    load_records(raw, &resolution.sub_items, mode)?;
    load_records(raw, &stitched.measurements, mode)?;

    let unit_count = verify_unit_count(
        &resolution.purchases,
        &resolution.sub_items,
        &stitched.measurements,
        &settings.units,
    );

    let stats = RunStats {
        purchases: resolution.purchases.len(),
        sub_items: resolution.sub_items.len(),
        measurements: stitched.measurements.len(),
        format_errors: sources.format_errors.len(),
        unresolved: stitched.unresolved.len(),
        unit_count,
    };
    info!(
        purchases = stats.purchases,
        sub_items = stats.sub_items,
        measurements = stats.measurements,
        unit_count = stats.unit_count.status.as_str(),
        "loaded raw data"
    );

    Ok(IngestReport {
        stats,
        format_errors: sources.format_errors,
        unresolved: stitched.unresolved,
    })
}

/// Normalize everything under `raw_data_dir` and load it
pub fn ingest<M: IdMinter>(
    settings: &Settings,
    registry: &mut DatastoreRegistry,
    minter: M,
    mode: LoadMode,
) -> Result<IngestReport> {
    let sources = SourceNormalizer::new(&settings.raw_data_dir)?.normalize()?;
    load_sources(sources, settings, registry, minter, mode)
}

/// Refresh calibration, then run the three stages in order
pub fn analyze(settings: &Settings, registry: &mut DatastoreRegistry, mode: LoadMode) -> Result<Stage> {
    let mut engine = AnalyticsEngine::new(registry, settings.stores.analysis_stores(), settings.analysis)?;
    engine.update_calibration()?;
    engine.analyze_all(mode)?;
    Ok(engine.stage())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{CATEGORY_ANALYSIS_TABLE, MEASUREMENT_ANALYSIS_TABLE};
    use crate::identity::SeededIds;
    use crate::stats::CountStatus;
    use std::path::Path;
    use tempfile::tempdir;

    const MD_COMBO: &str = "\
Flavor: {flavor}
Location: CCO
Price: 15.99
Purchased: March 3, 2024
Started: 03/05/2024
Finished: 03/20/2024

| Can | Initial Mass | Initial Volume | Final Mass | Final Volume | Status | Empty |
| --- | --- | --- | --- | --- | --- | --- |
";

    fn settings(root: &Path) -> Settings {
        let config = root.join("db_table_config.csv");
        std::fs::write(&config, include_str!("../config/db_table_config.csv")).unwrap();
        let reference = root.join("reference_data.csv");
        std::fs::write(&reference, include_str!("../config/reference_data.csv")).unwrap();

        let mut settings = Settings {
            database_dir: root.join("db"),
            raw_data_dir: root.join("raw"),
            export_dir: root.join("export"),
            schema_config: config,
            reference_data: reference,
            ..Settings::default()
        };
        settings.identity.seed = Some("test".to_string());
        settings
    }

    /// 1 target pack (8 cans) + 1 three-flavor Costco pack (8 cans each)
    /// + a measurement file with no matching purchase
    fn write_raw(settings: &Settings) {
        let n = SourceNormalizer::new(&settings.raw_data_dir).unwrap();
        std::fs::create_dir_all(n.csv_measurement_dir()).unwrap();
        std::fs::create_dir_all(n.markdown_dir()).unwrap();

        std::fs::write(
            n.csv_purchase_path(),
            "og_id,flavor,purchase_date,price,location,start_date,finish_date,DV,TTS\n\
             3LIM,LIM,01/02/2023,5.49,TGT,01/04/2023,01/20/2023,16,2\n",
        )
        .unwrap();

        let mut cans = String::from("can_id,initial_mass,initial_volume,final_mass,final_volume,finish_status\n");
        for i in 1..=8 {
            cans.push_str(&format!("{},370,12,{},0.1,finished\n", i, 14 + i));
        }
        std::fs::write(n.csv_measurement_dir().join("3LIM.csv"), &cans).unwrap();
        std::fs::write(n.csv_measurement_dir().join("99ZZZ.csv"), &cans).unwrap();

        for (i, flavor) in ["PSF", "KEY", "MAN"].iter().enumerate() {
            let mut md = MD_COMBO.replace("{flavor}", flavor);
            for can in 1..=8 {
                md.push_str(&format!("| {} | 371 | 12 | 20 | 0.3 | finished | 14 |\n", can));
            }
            std::fs::write(n.markdown_dir().join(format!("12CCO{} {}.md", i + 1, flavor)), md).unwrap();
        }
    }

    #[test]
    fn test_end_to_end() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        write_raw(&settings);

        let mut registry = DatastoreRegistry::new();
        let mut minter = SeededIds::new("ref");
        let created = init_stores(&settings, &mut registry, false, &mut minter).unwrap();
        assert_eq!(created, vec!["master", "raw_data", "static_analyses", "dynamic_analyses"]);
        assert_eq!(registry.get("master").unwrap().count("reference").unwrap(), 11);

        let report = ingest(&settings, &mut registry, SeededIds::new("t"), LoadMode::Replace).unwrap();
        // 12CCO1..3 share the base id `12CCO`
        assert_eq!(report.stats.purchases, 2);
        assert_eq!(report.stats.sub_items, 4);
        assert_eq!(report.stats.measurements, 32);
        assert_eq!(report.stats.unit_count.status, CountStatus::Pass);
        assert_eq!(report.unresolved.len(), 1);
        assert!(matches!(&report.unresolved[0], Error::UnresolvedLineage(k) if k == "99ZZZ"));

        let stage = analyze(&settings, &mut registry, LoadMode::Replace).unwrap();
        assert_eq!(stage, Stage::CategoryAnalyzed);

        let static_store = registry.get("static_analyses").unwrap();
        assert_eq!(static_store.count(MEASUREMENT_ANALYSIS_TABLE).unwrap(), 32);
        let dynamic = registry.get("dynamic_analyses").unwrap();
        assert_eq!(dynamic.count(CATEGORY_ANALYSIS_TABLE).unwrap(), 4);
    }

    #[test]
    fn test_reset_from_fresh_registry_drops_files_on_disk() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        write_raw(&settings);

        let mut registry = DatastoreRegistry::new();
        init_stores(&settings, &mut registry, false, &mut SeededIds::new("ref")).unwrap();
        ingest(&settings, &mut registry, SeededIds::new("t"), LoadMode::Replace).unwrap();

        // new process: nothing registered yet
        let mut registry = DatastoreRegistry::new();
        init_stores(&settings, &mut registry, true, &mut SeededIds::new("ref")).unwrap();
        assert_eq!(registry.get("raw_data").unwrap().count("purchases").unwrap(), 0);
        assert_eq!(registry.get("master").unwrap().count("reference").unwrap(), 11);

        let mut reopened = DatastoreRegistry::new();
        let created = open_stores(&settings, &mut reopened).unwrap();
        assert_eq!(created.len(), 4);
        assert_eq!(reopened.get("master").unwrap().count("reference").unwrap(), 11);
    }

    #[test]
    fn test_combo_pack_grouping_and_unit_count() {
        let dir = tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.units.default = 8;
        settings.units.channels.insert("CCO".to_string(), 24);

        let n = SourceNormalizer::new(&settings.raw_data_dir).unwrap();
        std::fs::create_dir_all(n.markdown_dir()).unwrap();
        for (i, flavor) in ["PSF", "KEY", "MAN"].iter().enumerate() {
            let mut md = MD_COMBO.replace("{flavor}", flavor);
            for can in 1..=8 {
                md.push_str(&format!("| {} | 371 | 12 | 20 | 0.3 | finished | 14 |\n", can));
            }
            // Same base id `12CCO`, variant number 1..3
            std::fs::write(n.markdown_dir().join(format!("12CCO{} {}.md", i + 1, flavor)), md).unwrap();
        }

        let mut registry = DatastoreRegistry::new();
        init_stores(&settings, &mut registry, false, &mut SeededIds::new("ref")).unwrap();
        let report = ingest(&settings, &mut registry, SeededIds::new("t"), LoadMode::Replace).unwrap();

        assert_eq!(report.stats.purchases, 1);
        assert_eq!(report.stats.sub_items, 3);
        assert_eq!(report.stats.unit_count.status, CountStatus::Pass);
    }

    #[test]
    fn test_combo_invariant_violation_aborts_load() {
        let dir = tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.identity.combo_variants = 2;

        let n = SourceNormalizer::new(&settings.raw_data_dir).unwrap();
        std::fs::create_dir_all(n.markdown_dir()).unwrap();
        for i in 1..=3 {
            let md = MD_COMBO.replace("{flavor}", "PSF");
            std::fs::write(n.markdown_dir().join(format!("12CCO{} x.md", i)), md).unwrap();
        }

        let mut registry = DatastoreRegistry::new();
        init_stores(&settings, &mut registry, false, &mut SeededIds::new("ref")).unwrap();
        let err = ingest(&settings, &mut registry, SeededIds::new("t"), LoadMode::Replace).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
        assert_eq!(registry.get("raw_data").unwrap().count("purchases").unwrap(), 0);
    }
}
