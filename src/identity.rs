// 🔑 Identity Resolution - surrogate ids + the load-time lineage map
//
// One purchase id per distinct base original id, one sub-item id per source
// row. The lineage map (original id → purchase id + sub-item id) only lives
// for a single load run: it is how measurement files find their parent.

use crate::entities::{Measurement, Purchase, SubItem};
use crate::error::{Error, Result};
use crate::normalize::{MeasurementBatch, SourceRow};
use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

/// Length of every minted id
pub const ID_LENGTH: usize = 7;

// ============================================================================
// ID MINTING
// ============================================================================

pub trait IdMinter {
    /// Fresh id, never one this minter has handed out before
    fn mint(&mut self) -> String;
}

/// uuid v4 based ids for production runs
#[derive(Debug, Default)]
pub struct RandomIds {
    issued: HashSet<String>,
}

impl RandomIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdMinter for RandomIds {
    fn mint(&mut self) -> String {
        loop {
            let id: String = uuid::Uuid::new_v4()
                .simple()
                .to_string()
                .chars()
                .take(ID_LENGTH)
                .collect();
            if self.issued.insert(id.clone()) {
                return id;
            }
        }
    }
}

/// Reproducible ids: SHA-256 of `seed:counter`
#[derive(Debug)]
pub struct SeededIds {
    seed: String,
    counter: u64,
    issued: HashSet<String>,
}

impl SeededIds {
    pub fn new(seed: impl Into<String>) -> Self {
        SeededIds {
            seed: seed.into(),
            counter: 0,
            issued: HashSet::new(),
        }
    }
}

impl IdMinter for SeededIds {
    fn mint(&mut self) -> String {
        loop {
            self.counter += 1;
            let mut hasher = Sha256::new();
            hasher.update(format!("{}:{}", self.seed, self.counter));
            let id: String = format!("{:x}", hasher.finalize())
                .chars()
                .take(ID_LENGTH)
                .collect();
            if self.issued.insert(id.clone()) {
                return id;
            }
        }
    }
}

impl<M: IdMinter + ?Sized> IdMinter for Box<M> {
    fn mint(&mut self) -> String {
        (**self).mint()
    }
}

/// Seeded when a seed is configured, random otherwise
pub fn minter_for(seed: Option<&str>) -> Box<dyn IdMinter> {
    match seed {
        Some(seed) => Box::new(SeededIds::new(seed)),
        None => Box::new(RandomIds::new()),
    }
}

// ============================================================================
// LINEAGE MAP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageEntry {
    pub purchase_id: String,
    pub sub_item_id: String,
}

/// Full original id → generated ids
#[derive(Debug, Default)]
pub struct LineageMap {
    entries: IndexMap<String, LineageEntry>,
}

impl LineageMap {
    pub fn get(&self, original_id: &str) -> Option<&LineageEntry> {
        self.entries.get(original_id)
    }

    pub fn resolve(&self, original_id: &str) -> Result<&LineageEntry> {
        self.get(original_id)
            .ok_or_else(|| Error::UnresolvedLineage(original_id.to_string()))
    }

    pub fn contains(&self, original_id: &str) -> bool {
        self.entries.contains_key(original_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

#[derive(Debug, Default)]
pub struct Resolution {
    pub purchases: Vec<Purchase>,
    pub sub_items: Vec<SubItem>,
    pub lineage: LineageMap,
}

pub struct IdentityResolver<M: IdMinter> {
    minter: M,
}

impl<M: IdMinter> IdentityResolver<M> {
    pub fn new(minter: M) -> Self {
        IdentityResolver { minter }
    }

    pub fn minter(&mut self) -> &mut M {
        &mut self.minter
    }

    /// Group rows by base original id (first-seen order) into purchases and
    /// give every row its own sub-item. A repeated original id keeps the
    /// first occurrence.
    pub fn resolve(&mut self, rows: &[SourceRow]) -> Resolution {
        let mut out = Resolution::default();
        // base original id → index into out.purchases
        let mut groups: HashMap<&str, usize> = HashMap::new();

        for row in rows {
            if out.lineage.contains(&row.original_id) {
                warn!(
                    original_id = %row.original_id,
                    source = %row.source_name,
                    "duplicate original id, keeping first occurrence"
                );
                continue;
            }

            let idx = match groups.get(row.base_original_id.as_str()) {
                Some(&idx) => {
                    let purchase = &out.purchases[idx];
                    if purchase.acquired_at != row.acquired_at || purchase.channel != row.channel {
                        warn!(
                            original_id = %row.original_id,
                            purchase_id = %purchase.id,
                            "variant disagrees with its purchase on date or channel; purchase keeps the first row's values"
                        );
                    }
                    idx
                }
                None => {
                    let purchase = Purchase::from_source(self.minter.mint(), row);
                    debug!(original_id = %purchase.original_id, id = %purchase.id, "minted purchase");
                    out.purchases.push(purchase);
                    groups.insert(row.base_original_id.as_str(), out.purchases.len() - 1);
                    out.purchases.len() - 1
                }
            };

            let purchase_id = out.purchases[idx].id.clone();
            let sub_item = SubItem::from_source(self.minter.mint(), purchase_id.clone(), row);
            debug!(original_id = %row.original_id, id = %sub_item.id, purchase_id = %purchase_id, "minted sub-item");

            out.lineage.entries.insert(
                row.original_id.clone(),
                LineageEntry {
                    purchase_id,
                    sub_item_id: sub_item.id.clone(),
                },
            );
            out.sub_items.push(sub_item);
        }

        info!(
            purchases = out.purchases.len(),
            sub_items = out.sub_items.len(),
            "resolved identities"
        );
        out
    }
}

// ============================================================================
// MEASUREMENT STITCHING
// ============================================================================

#[derive(Debug, Default)]
pub struct StitchReport {
    pub measurements: Vec<Measurement>,
    /// One `UnresolvedLineage` per batch that had no parent
    pub unresolved: Vec<Error>,
}

/// Attach each batch to its sub-item through the lineage map. Unresolvable
/// batches are reported and excluded; the rest still load.
pub fn stitch_measurements(
    batches: &[MeasurementBatch],
    lineage: &LineageMap,
    sub_items: &mut [SubItem],
) -> StitchReport {
    let mut report = StitchReport::default();
    let index: HashMap<String, usize> = sub_items
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.clone(), i))
        .collect();
    let mut seen: HashSet<String> = HashSet::new();

    for batch in batches {
        let entry = match lineage.resolve(&batch.original_id) {
            Ok(entry) => entry,
            Err(e) => {
                error!(
                    original_id = %batch.original_id,
                    source = %batch.source_name,
                    "measurement batch has no sub-item"
                );
                report.unresolved.push(e);
                continue;
            }
        };

        for row in &batch.rows {
            let measurement = Measurement::from_row(&entry.sub_item_id, row);
            if !seen.insert(measurement.id.clone()) {
                warn!(id = %measurement.id, source = %batch.source_name, "duplicate measurement, skipping");
                continue;
            }
            report.measurements.push(measurement);
        }

        if !batch.rows.is_empty() {
            if let Some(&i) = index.get(&entry.sub_item_id) {
                sub_items[i].has_measurements = true;
            }
        }
    }

    info!(
        measurements = report.measurements.len(),
        unresolved = report.unresolved.len(),
        "stitched measurements"
    );
    report
}

// ============================================================================
// COMBO DIFFERENTIAL
// ============================================================================

/// `len(sub_items) - len(purchases)` must equal
/// `count(combo purchases) * (combo_variants - 1)`
pub fn validate_combo_differential(
    purchases: &[Purchase],
    sub_items: &[SubItem],
    combo_channel: &str,
    combo_variants: usize,
) -> Result<()> {
    let combos = purchases.iter().filter(|p| p.is_channel(combo_channel)).count() as i64;
    let expected = combos * (combo_variants.saturating_sub(1) as i64);
    let actual = sub_items.len() as i64 - purchases.len() as i64;

    if actual != expected {
        return Err(Error::Invariant(format!(
            "{} sub-items vs {} purchases: differential {} but {} `{}` purchases of {} variants expect {}",
            sub_items.len(),
            purchases.len(),
            actual,
            combos,
            combo_channel,
            combo_variants,
            expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{MeasurementRow, SourceKind};

    fn row(original_id: &str, base: &str, channel: &str) -> SourceRow {
        SourceRow {
            kind: SourceKind::Csv,
            source_name: "box_data.csv".to_string(),
            original_id: original_id.to_string(),
            base_original_id: base.to_string(),
            category: Some(original_id.trim_start_matches(char::is_numeric).to_string()),
            acquired_at: None,
            price: None,
            channel: Some(channel.to_string()),
            started_at: None,
            finished_at: None,
        }
    }

    fn batch(original_id: &str, cans: usize) -> MeasurementBatch {
        MeasurementBatch {
            kind: SourceKind::Csv,
            original_id: original_id.to_string(),
            source_name: format!("{}.csv", original_id),
            rows: (1..=cans)
                .map(|i| MeasurementRow {
                    sequence: i.to_string(),
                    initial_mass: Some(370.0),
                    initial_volume: Some(12.0),
                    final_mass: Some(20.0),
                    final_volume: Some(0.1),
                    finish_status: None,
                    empty_can_mass: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_seeded_ids_are_reproducible_and_unique() {
        let mut a = SeededIds::new("run");
        let mut b = SeededIds::new("run");
        let ids_a: Vec<String> = (0..200).map(|_| a.mint()).collect();
        let ids_b: Vec<String> = (0..200).map(|_| b.mint()).collect();

        assert_eq!(ids_a, ids_b);
        assert!(ids_a.iter().all(|id| id.len() == ID_LENGTH));
        let unique: HashSet<&String> = ids_a.iter().collect();
        assert_eq!(unique.len(), ids_a.len());
    }

    #[test]
    fn test_random_ids_are_unique() {
        let mut minter = RandomIds::new();
        let ids: HashSet<String> = (0..500).map(|_| minter.mint()).collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_resolve_groups_combo_variants() {
        let rows = vec![
            row("1LIM", "1LIM", "TGT"),
            row("2PSF1", "2PSF", "CCO"),
            row("2PSF2", "2PSF", "CCO"),
            row("2PSF3", "2PSF", "CCO"),
            row("1LIM", "1LIM", "TGT"),
        ];
        let mut resolver = IdentityResolver::new(SeededIds::new("t"));
        let res = resolver.resolve(&rows);

        assert_eq!(res.purchases.len(), 2);
        assert_eq!(res.sub_items.len(), 4);
        assert_eq!(res.lineage.len(), 4);
        assert_eq!(res.purchases[1].original_id, "2PSF");

        let a = res.lineage.get("2PSF1").unwrap();
        let b = res.lineage.get("2PSF3").unwrap();
        assert_eq!(a.purchase_id, b.purchase_id);
        assert_ne!(a.sub_item_id, b.sub_item_id);
        assert_eq!(a.purchase_id, res.purchases[1].id);
    }

    #[test]
    fn test_every_sub_item_has_a_purchase() {
        let rows = vec![row("1LIM", "1LIM", "TGT"), row("5PSF1", "5PSF", "CCO")];
        let res = IdentityResolver::new(SeededIds::new("t")).resolve(&rows);

        let ids: HashSet<&str> = res.purchases.iter().map(|p| p.id.as_str()).collect();
        assert!(res.sub_items.iter().all(|s| ids.contains(s.purchase_id.as_str())));
    }

    #[test]
    fn test_unresolved_batch_does_not_block_siblings() {
        let rows = vec![row("1LIM", "1LIM", "TGT"), row("3PSF", "3PSF", "TGT")];
        let mut res = IdentityResolver::new(SeededIds::new("t")).resolve(&rows);

        let batches = vec![batch("1LIM", 8), batch("9XYZ", 8), batch("3PSF", 2)];
        let report = stitch_measurements(&batches, &res.lineage, &mut res.sub_items);

        assert_eq!(report.measurements.len(), 10);
        assert_eq!(report.unresolved.len(), 1);
        match &report.unresolved[0] {
            Error::UnresolvedLineage(key) => assert_eq!(key, "9XYZ"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(res.sub_items.iter().all(|s| s.has_measurements));

        let sub_item_id = &res.lineage.get("1LIM").unwrap().sub_item_id;
        assert_eq!(report.measurements[0].id, format!("1.{}", sub_item_id));
    }

    #[test]
    fn test_combo_differential_example() {
        // 50 purchases, 3 of them 2-variant combo packs → 53 sub-items
        let mut rows = Vec::new();
        for i in 0..47 {
            rows.push(row(&format!("{}LIM", i), &format!("{}LIM", i), "TGT"));
        }
        for i in 100..103 {
            rows.push(row(&format!("{}PSF1", i), &format!("{}PSF", i), "CCO"));
            rows.push(row(&format!("{}PSF2", i), &format!("{}PSF", i), "CCO"));
        }
        let res = IdentityResolver::new(SeededIds::new("t")).resolve(&rows);

        assert_eq!(res.purchases.len(), 50);
        assert_eq!(res.sub_items.len(), 53);
        validate_combo_differential(&res.purchases, &res.sub_items, "CCO", 2).unwrap();

        let err = validate_combo_differential(&res.purchases, &res.sub_items, "CCO", 3).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }

    #[test]
    fn test_combo_differential_three_variants() {
        let rows = vec![
            row("1LIM", "1LIM", "TGT"),
            row("2PSF1", "2PSF", "CCO"),
            row("2PSF2", "2PSF", "CCO"),
            row("2PSF3", "2PSF", "CCO"),
        ];
        let res = IdentityResolver::new(SeededIds::new("t")).resolve(&rows);
        validate_combo_differential(&res.purchases, &res.sub_items, "CCO", 3).unwrap();
    }
}
