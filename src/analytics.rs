// 📊 Analytics Engine - measurement → sub-item → category metrics
//
// Three stages, each a separate call, each reading the previous stage's
// materialized table:
//
//   RawLoaded ──analyze_measurements──▶ MeasurementAnalyzed
//             ──analyze_subitems──────▶ SubItemAnalyzed
//             ──analyze_categories────▶ CategoryAnalyzed
//
// A stage may run once the engine has reached its prerequisite. Running an
// earlier stage again moves the engine back to that stage. A failing stage
// leaves every committed table untouched and the engine where it was.

use crate::db::{bool_value, real_value, text_value, Frame, LoadMode};
use crate::entities::{parse_stored_date, EntityKind, Measurement, Record};
use crate::error::{Error, Result};
use crate::registry::DatastoreRegistry;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{error, info, warn};

pub const MEASUREMENT_ANALYSIS_TABLE: &str = "measurement_analysis";
pub const SUBITEM_ANALYSIS_TABLE: &str = "subitem_analysis";
pub const CATEGORY_ANALYSIS_TABLE: &str = "category_analysis";
pub const CALIBRATION_TABLE: &str = "calibration";

pub const CALIBRATION_PARAMETERS: [&str; 4] = [
    "avg_measurement_mass",
    "avg_measurement_volume",
    "avg_empty_mass",
    "avg_empty_volume",
];

const MEASUREMENT_ANALYSIS_COLUMNS: [&str; 11] = [
    "measurement_id",
    "sub_item_id",
    "empty_can_mass",
    "empty_can_volume",
    "percent_mass_remaining",
    "percent_volume_remaining",
    "objective_finish",
    "raw_mass_delta",
    "raw_volume_delta",
    "true_mass_delta",
    "true_volume_delta",
];

const SUBITEM_ANALYSIS_COLUMNS: [&str; 8] = [
    "sub_item_id",
    "category",
    "time_to_start",
    "consumption_velocity",
    "completion_rate",
    "average_pmr",
    "average_pvr",
    "measurement_count",
];

const CATEGORY_ANALYSIS_COLUMNS: [&str; 8] = [
    "category",
    "total_purchased",
    "sub_item_count",
    "average_time_to_start",
    "average_consumption_velocity",
    "average_completion_rate",
    "average_pmr",
    "average_pvr",
];

// ============================================================================
// STAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    RawLoaded,
    MeasurementAnalyzed,
    SubItemAnalyzed,
    CategoryAnalyzed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::RawLoaded => "raw_loaded",
            Stage::MeasurementAnalyzed => "measurement_analyzed",
            Stage::SubItemAnalyzed => "subitem_analyzed",
            Stage::CategoryAnalyzed => "category_analyzed",
        }
    }

    /// Stage the engine must have reached before this one may run
    pub fn prerequisite(&self) -> Option<Stage> {
        match self {
            Stage::RawLoaded => None,
            Stage::MeasurementAnalyzed => Some(Stage::RawLoaded),
            Stage::SubItemAnalyzed => Some(Stage::MeasurementAnalyzed),
            Stage::CategoryAnalyzed => Some(Stage::SubItemAnalyzed),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// Which registered stores the engine reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStores {
    pub raw: String,
    pub static_analyses: String,
    pub dynamic_analyses: String,
}

impl Default for AnalysisStores {
    fn default() -> Self {
        AnalysisStores {
            raw: "raw_data".to_string(),
            static_analyses: "static_analyses".to_string(),
            dynamic_analyses: "dynamic_analyses".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// `percent_mass_remaining` below this counts as finished
    pub finish_threshold: f64,
    /// empty-can mass (g) → volume (fl oz)
    pub empty_volume_divisor: f64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        AnalysisParams {
            finish_threshold: 0.015,
            empty_volume_divisor: 29.5,
        }
    }
}

/// Fallback averages from the calibration table
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub avg_measurement_mass: Option<f64>,
    pub avg_measurement_volume: Option<f64>,
    pub avg_empty_mass: Option<f64>,
    pub avg_empty_volume: Option<f64>,
}

impl Calibration {
    fn set(&mut self, parameter: &str, value: Option<f64>) {
        match parameter {
            "avg_measurement_mass" => self.avg_measurement_mass = value,
            "avg_measurement_volume" => self.avg_measurement_volume = value,
            "avg_empty_mass" => self.avg_empty_mass = value,
            "avg_empty_volume" => self.avg_empty_volume = value,
            other => warn!(parameter = other, "unknown calibration parameter"),
        }
    }

    pub fn get(&self, parameter: &str) -> Option<f64> {
        match parameter {
            "avg_measurement_mass" => self.avg_measurement_mass,
            "avg_measurement_volume" => self.avg_measurement_volume,
            "avg_empty_mass" => self.avg_empty_mass,
            "avg_empty_volume" => self.avg_empty_volume,
            _ => None,
        }
    }
}

// ============================================================================
// PURE METRICS
// ============================================================================

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// `max(final - empty, 0) / (initial - empty)`; `None` when an input is
/// missing or the container weighs at least as much as the full reading
pub fn percent_remaining(initial: Option<f64>, final_reading: Option<f64>, empty: f64) -> Option<f64> {
    let (initial, final_reading) = (initial?, final_reading?);
    let denominator = initial - empty;
    if denominator <= 0.0 {
        return None;
    }
    Some((final_reading - empty).max(0.0) / denominator)
}

/// Content consumed: `(initial - empty) - max(final - empty, 0)`
pub fn true_delta(initial: Option<f64>, final_reading: Option<f64>, empty: f64) -> Option<f64> {
    let (initial, final_reading) = (initial?, final_reading?);
    Some((initial - empty) - (final_reading - empty).max(0.0))
}

/// One row of `measurement_analysis`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementMetrics {
    pub measurement_id: String,
    pub sub_item_id: String,
    pub empty_can_mass: f64,
    pub empty_can_volume: f64,
    pub percent_mass_remaining: Option<f64>,
    pub percent_volume_remaining: Option<f64>,
    pub objective_finish: Option<bool>,
    pub raw_mass_delta: Option<f64>,
    pub raw_volume_delta: Option<f64>,
    pub true_mass_delta: Option<f64>,
    pub true_volume_delta: Option<f64>,
}

impl MeasurementMetrics {
    /// `empty_can_*` fall back to the given averages when the measurement
    /// has no weighed container
    pub fn compute(
        m: &Measurement,
        fallback_empty_mass: f64,
        fallback_empty_volume: f64,
        params: &AnalysisParams,
    ) -> Self {
        let (empty_mass, empty_volume) = match m.empty_can_mass {
            Some(mass) => (mass, round2(mass / params.empty_volume_divisor)),
            None => (fallback_empty_mass, fallback_empty_volume),
        };

        let pmr = percent_remaining(m.initial_mass, m.final_mass, empty_mass);
        let pvr = percent_remaining(m.initial_volume, m.final_volume, empty_volume);

        MeasurementMetrics {
            measurement_id: m.id.clone(),
            sub_item_id: m.sub_item_id.clone(),
            empty_can_mass: empty_mass,
            empty_can_volume: empty_volume,
            percent_mass_remaining: pmr,
            percent_volume_remaining: pvr,
            objective_finish: pmr.map(|p| p < params.finish_threshold),
            raw_mass_delta: m.initial_mass.zip(m.final_mass).map(|(i, f)| i - f),
            raw_volume_delta: m.initial_volume.zip(m.final_volume).map(|(i, f)| i - f),
            true_mass_delta: true_delta(m.initial_mass, m.final_mass, empty_mass),
            true_volume_delta: true_delta(m.initial_volume, m.final_volume, empty_volume),
        }
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.measurement_id.clone()),
            Value::Text(self.sub_item_id.clone()),
            Value::Real(self.empty_can_mass),
            Value::Real(self.empty_can_volume),
            real_value(self.percent_mass_remaining),
            real_value(self.percent_volume_remaining),
            bool_value(self.objective_finish),
            real_value(self.raw_mass_delta),
            real_value(self.raw_volume_delta),
            real_value(self.true_mass_delta),
            real_value(self.true_volume_delta),
        ]
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct AnalyticsEngine<'r> {
    registry: &'r mut DatastoreRegistry,
    stores: AnalysisStores,
    params: AnalysisParams,
    stage: Stage,
}

impl<'r> AnalyticsEngine<'r> {
    /// Engine over already-loaded raw data. All three stores must be registered.
    pub fn new(
        registry: &'r mut DatastoreRegistry,
        stores: AnalysisStores,
        params: AnalysisParams,
    ) -> Result<Self> {
        for name in [&stores.raw, &stores.static_analyses, &stores.dynamic_analyses] {
            registry.get(name)?;
        }
        Ok(AnalyticsEngine {
            registry,
            stores,
            params,
            stage: Stage::RawLoaded,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn params(&self) -> &AnalysisParams {
        &self.params
    }

    fn run_stage<T>(&mut self, stage: Stage, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if let Some(required) = stage.prerequisite() {
            if self.stage < required {
                return Err(Error::StageOrder {
                    requested: stage,
                    required,
                    current: self.stage,
                });
            }
        }

        match f(self) {
            Ok(out) => {
                info!(from = %self.stage, to = %stage, "stage complete");
                self.stage = stage;
                Ok(out)
            }
            Err(e) => {
                error!(stage = %stage, error = %e, "stage failed");
                Err(Error::Stage {
                    stage,
                    source: Box::new(e),
                })
            }
        }
    }

    // ------------------------------------------------------------------------
    // Calibration
    // ------------------------------------------------------------------------

    /// Current calibration values; all `None` when the table is absent
    pub fn calibration(&self) -> Result<Calibration> {
        let dynamic = self.registry.get(&self.stores.dynamic_analyses)?;
        let mut calibration = Calibration::default();
        if dynamic.header(CALIBRATION_TABLE).is_none() {
            return Ok(calibration);
        }

        let frame = dynamic.get_data(&["parameter", "value"], CALIBRATION_TABLE, &[])?;
        for row in 0..frame.len() {
            if let Some(parameter) = frame.text(row, 0) {
                calibration.set(&parameter, frame.real(row, 1));
            }
        }
        Ok(calibration)
    }

    /// Reset the calibration table to every parameter at 0.0
    pub fn seed_calibration(&mut self) -> Result<usize> {
        let mut frame = Frame::new(["parameter", "value"]);
        for parameter in CALIBRATION_PARAMETERS {
            frame.push_row(vec![Value::Text(parameter.to_string()), Value::Real(0.0)])?;
        }

        let dynamic = self.registry.get_mut(&self.stores.dynamic_analyses)?;
        let n = dynamic.bulk_load(CALIBRATION_TABLE, &frame, LoadMode::Replace)?;
        info!(parameters = ?CALIBRATION_PARAMETERS, "seeded calibration with defaults");
        Ok(n)
    }

    /// Recompute the averages from raw measurements that carry a weighed
    /// empty container. Parameters with no data keep their stored value.
    pub fn update_calibration(&mut self) -> Result<Calibration> {
        let needs_seed = {
            let dynamic = self.registry.get(&self.stores.dynamic_analyses)?;
            dynamic.header(CALIBRATION_TABLE).is_none() || dynamic.count(CALIBRATION_TABLE)? == 0
        };
        if needs_seed {
            self.seed_calibration()?;
        }

        let raw = self.registry.get(&self.stores.raw)?;
        let frame = raw.get_data(
            &["initial_mass", "initial_volume", "empty_can_mass"],
            EntityKind::Measurement.table_name(),
            &[],
        )?;

        let weighed: Vec<usize> = (0..frame.len()).filter(|&r| frame.real(r, 2).is_some()).collect();
        if weighed.is_empty() {
            warn!("no measurements with an empty-can mass; calibration unchanged");
            return self.calibration();
        }

        let divisor = self.params.empty_volume_divisor;
        let updates = [
            ("avg_measurement_mass", mean(weighed.iter().filter_map(|&r| frame.real(r, 0)))),
            ("avg_measurement_volume", mean(weighed.iter().filter_map(|&r| frame.real(r, 1)))),
            ("avg_empty_mass", mean(weighed.iter().filter_map(|&r| frame.real(r, 2)))),
            (
                "avg_empty_volume",
                mean(weighed.iter().filter_map(|&r| frame.real(r, 2)).map(|m| round2(m / divisor))),
            ),
        ];

        let dynamic = self.registry.get(&self.stores.dynamic_analyses)?;
        for (parameter, value) in updates {
            let Some(value) = value else { continue };
            dynamic.update_values(
                CALIBRATION_TABLE,
                &[("value", Value::Real(round2(value)))],
                &[("parameter", Value::Text(parameter.to_string()))],
            )?;
        }

        let calibration = self.calibration()?;
        info!(?calibration, samples = weighed.len(), "updated calibration");
        Ok(calibration)
    }

    // ------------------------------------------------------------------------
    // Stage 1: measurements
    // ------------------------------------------------------------------------

    fn raw_measurements(&self) -> Result<Vec<Measurement>> {
        let raw = self.registry.get(&self.stores.raw)?;
        let frame = raw.get_data(Measurement::FIELDS, EntityKind::Measurement.table_name(), &[])?;

        let col = |name: &str| frame.require_column(name);
        let (id, sub_item_id) = (col("id")?, col("sub_item_id")?);
        let (im, iv, fm, fv) = (
            col("initial_mass")?,
            col("initial_volume")?,
            col("final_mass")?,
            col("final_volume")?,
        );
        let (empty, status) = (col("empty_can_mass")?, col("finish_status")?);

        let mut out = Vec::with_capacity(frame.len());
        for r in 0..frame.len() {
            let (Some(m_id), Some(s_id)) = (frame.text(r, id), frame.text(r, sub_item_id)) else {
                warn!(row = r, "measurement without id or sub-item id, skipping");
                continue;
            };
            out.push(Measurement {
                id: m_id,
                sub_item_id: s_id,
                initial_mass: frame.real(r, im),
                initial_volume: frame.real(r, iv),
                final_mass: frame.real(r, fm),
                final_volume: frame.real(r, fv),
                empty_can_mass: frame.real(r, empty),
                finish_status: frame.text(r, status),
            });
        }
        Ok(out)
    }

    /// Per-measurement remaining percentages, finish flag and deltas
    pub fn analyze_measurements(&mut self, mode: LoadMode) -> Result<usize> {
        self.run_stage(Stage::MeasurementAnalyzed, |engine| {
            let measurements = engine.raw_measurements()?;
            let calibration = engine.calibration()?;
            let params = engine.params;

            // seeded 0.0 means unknown
            let fallback_mass = calibration
                .avg_empty_mass
                .filter(|&m| m > 0.0)
                .or_else(|| mean(measurements.iter().filter_map(|m| m.empty_can_mass)))
                .unwrap_or(0.0);
            let fallback_volume = calibration
                .avg_empty_volume
                .filter(|&v| v > 0.0)
                .unwrap_or_else(|| round2(fallback_mass / params.empty_volume_divisor));

            let mut frame = Frame::new(MEASUREMENT_ANALYSIS_COLUMNS);
            for m in &measurements {
                let metrics = MeasurementMetrics::compute(m, fallback_mass, fallback_volume, &params);
                frame.push_row(metrics.values())?;
            }

            let store = engine.registry.get_mut(&engine.stores.static_analyses)?;
            store.bulk_load(MEASUREMENT_ANALYSIS_TABLE, &frame, mode)
        })
    }

    // ------------------------------------------------------------------------
    // Stage 2: sub-items
    // ------------------------------------------------------------------------

    /// Per-sub-item timing, completion rate and mean remaining percentages
    pub fn analyze_subitems(&mut self, mode: LoadMode) -> Result<usize> {
        self.run_stage(Stage::SubItemAnalyzed, |engine| {
            let raw = engine.registry.get(&engine.stores.raw)?;
            let purchases = raw.get_data(&["id", "acquired_at"], EntityKind::Purchase.table_name(), &[])?;
            let sub_items = raw.get_data(
                &["id", "purchase_id", "category", "started_at", "finished_at"],
                EntityKind::SubItem.table_name(),
                &[],
            )?;

            let acquired: HashMap<String, Option<String>> = (0..purchases.len())
                .filter_map(|r| purchases.text(r, 0).map(|id| (id, purchases.text(r, 1))))
                .collect();

            let analysis = engine.registry.get(&engine.stores.static_analyses)?.get_data(
                &["sub_item_id", "percent_mass_remaining", "percent_volume_remaining", "objective_finish"],
                MEASUREMENT_ANALYSIS_TABLE,
                &[],
            )?;
            let mut by_sub_item: HashMap<String, Vec<usize>> = HashMap::new();
            for r in 0..analysis.len() {
                if let Some(id) = analysis.text(r, 0) {
                    by_sub_item.entry(id).or_default().push(r);
                }
            }

            let mut frame = Frame::new(SUBITEM_ANALYSIS_COLUMNS);
            for r in 0..sub_items.len() {
                let Some(id) = sub_items.text(r, 0) else { continue };
                let purchase_date = sub_items
                    .text(r, 1)
                    .and_then(|p| acquired.get(&p).cloned().flatten());
                let acquired_at = parse_stored_date(purchase_date.as_deref());
                let started_at = parse_stored_date(sub_items.text(r, 3).as_deref());
                let finished_at = parse_stored_date(sub_items.text(r, 4).as_deref());

                let time_to_start = started_at.zip(acquired_at).map(|(s, a)| (s - a).num_days());
                let velocity = finished_at.zip(started_at).map(|(f, s)| (f - s).num_days());

                let rows = by_sub_item.get(&id).map(Vec::as_slice).unwrap_or(&[]);
                let count = rows.len();
                let finished = rows
                    .iter()
                    .filter(|&&a| analysis.boolean(a, 3) == Some(true))
                    .count();
                let completion_rate = (count > 0).then(|| finished as f64 / count as f64);
                let average_pmr = mean(rows.iter().filter_map(|&a| analysis.real(a, 1)));
                let average_pvr = mean(rows.iter().filter_map(|&a| analysis.real(a, 2)));

                frame.push_row(vec![
                    Value::Text(id),
                    text_value(sub_items.text(r, 2).as_deref()),
                    time_to_start.map(Value::Integer).unwrap_or(Value::Null),
                    velocity.map(Value::Integer).unwrap_or(Value::Null),
                    real_value(completion_rate),
                    real_value(average_pmr),
                    real_value(average_pvr),
                    Value::Integer(count as i64),
                ])?;
            }

            let store = engine.registry.get_mut(&engine.stores.static_analyses)?;
            store.bulk_load(SUBITEM_ANALYSIS_TABLE, &frame, mode)
        })
    }

    // ------------------------------------------------------------------------
    // Stage 3: categories
    // ------------------------------------------------------------------------

    /// Per-category purchase count and averages of the sub-item metrics
    pub fn analyze_categories(&mut self, mode: LoadMode) -> Result<usize> {
        self.run_stage(Stage::CategoryAnalyzed, |engine| {
            let raw = engine.registry.get(&engine.stores.raw)?;
            let sub_items = raw.get_data(
                &["id", "purchase_id", "category"],
                EntityKind::SubItem.table_name(),
                &[],
            )?;

            let analysis = engine.registry.get(&engine.stores.static_analyses)?.get_data(
                &[
                    "sub_item_id",
                    "time_to_start",
                    "consumption_velocity",
                    "completion_rate",
                    "average_pmr",
                    "average_pvr",
                ],
                SUBITEM_ANALYSIS_TABLE,
                &[],
            )?;
            let by_sub_item: HashMap<String, usize> = (0..analysis.len())
                .filter_map(|r| analysis.text(r, 0).map(|id| (id, r)))
                .collect();

            // category → (purchase ids, sub-item ids)
            let mut groups: BTreeMap<String, (HashSet<String>, Vec<String>)> = BTreeMap::new();
            for r in 0..sub_items.len() {
                let (Some(id), Some(category)) = (sub_items.text(r, 0), sub_items.text(r, 2)) else {
                    warn!(row = r, "sub-item without category, leaving it out of category analysis");
                    continue;
                };
                let group = groups.entry(category).or_default();
                if let Some(purchase_id) = sub_items.text(r, 1) {
                    group.0.insert(purchase_id);
                }
                group.1.push(id);
            }

            let mut frame = Frame::new(CATEGORY_ANALYSIS_COLUMNS);
            for (category, (purchases, ids)) in groups {
                let rows: Vec<usize> = ids.iter().filter_map(|id| by_sub_item.get(id).copied()).collect();
                let avg = |col: usize| mean(rows.iter().filter_map(|&r| analysis.real(r, col)));

                frame.push_row(vec![
                    Value::Text(category),
                    Value::Integer(purchases.len() as i64),
                    Value::Integer(ids.len() as i64),
                    real_value(avg(1)),
                    real_value(avg(2)),
                    real_value(avg(3)),
                    real_value(avg(4)),
                    real_value(avg(5)),
                ])?;
            }

            let store = engine.registry.get_mut(&engine.stores.dynamic_analyses)?;
            store.bulk_load(CATEGORY_ANALYSIS_TABLE, &frame, mode)
        })
    }

    /// All three stages in order
    pub fn analyze_all(&mut self, mode: LoadMode) -> Result<()> {
        self.analyze_measurements(mode)?;
        self.analyze_subitems(mode)?;
        self.analyze_categories(mode)?;
        Ok(())
    }
}
