// 🔍 Run statistics + expected unit count verification
//
// Every purchase channel has an expected number of measured units (a Costco
// pack holds 24 cans, a Walgreens pack 6, anything else 8). A load whose
// measurement count misses the total by a whole number of default packs most
// likely has empty purchases, so it is reported as uncertain instead of failed.

use crate::entities::{Measurement, Purchase, SubItem};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitExpectations {
    /// Units for any channel not listed
    pub default: usize,
    /// channel code → units
    #[serde(flatten)]
    pub channels: IndexMap<String, usize>,
}

impl Default for UnitExpectations {
    fn default() -> Self {
        let mut channels = IndexMap::new();
        channels.insert("CCO".to_string(), 24);
        channels.insert("WLG".to_string(), 6);
        UnitExpectations {
            default: 8,
            channels,
        }
    }
}

impl UnitExpectations {
    pub fn expected_for(&self, channel: Option<&str>) -> usize {
        channel
            .and_then(|c| self.channels.get(c).copied())
            .unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountStatus {
    Pass,
    Fail,
    Uncertain,
}

impl CountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountStatus::Pass => "PASS",
            CountStatus::Fail => "FAIL",
            CountStatus::Uncertain => "UNCERTAIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountCheck {
    pub status: CountStatus,
    pub expected: usize,
    pub actual: usize,
    /// Original ids of purchases with no measured units (only when uncertain)
    pub empty_purchases: Vec<String>,
}

impl CountCheck {
    pub fn message(&self) -> String {
        match self.status {
            CountStatus::Pass => "measured units match the expected count".to_string(),
            CountStatus::Fail => format!(
                "measured units ({}) do not match the expected count ({})",
                self.actual, self.expected
            ),
            CountStatus::Uncertain => format!(
                "measured units ({}) do not match the expected count ({}); probably empty purchases: {:?}",
                self.actual, self.expected, self.empty_purchases
            ),
        }
    }
}

/// Expected units per purchase (by channel) vs. measurements actually loaded
pub fn verify_unit_count(
    purchases: &[Purchase],
    sub_items: &[SubItem],
    measurements: &[Measurement],
    units: &UnitExpectations,
) -> CountCheck {
    let expected: usize = purchases
        .iter()
        .map(|p| units.expected_for(p.channel.as_deref()))
        .sum();
    let actual = measurements.len();

    if expected == actual {
        return CountCheck {
            status: CountStatus::Pass,
            expected,
            actual,
            empty_purchases: Vec::new(),
        };
    }

    let difference = expected as i64 - actual as i64;
    if difference.rem_euclid(units.default as i64) != 0 {
        return CountCheck {
            status: CountStatus::Fail,
            expected,
            actual,
            empty_purchases: Vec::new(),
        };
    }

    let parent: HashMap<&str, &str> = sub_items
        .iter()
        .map(|s| (s.id.as_str(), s.purchase_id.as_str()))
        .collect();
    let measured: HashSet<&str> = measurements
        .iter()
        .filter_map(|m| parent.get(m.sub_item_id.as_str()).copied())
        .collect();

    CountCheck {
        status: CountStatus::Uncertain,
        expected,
        actual,
        empty_purchases: purchases
            .iter()
            .filter(|p| !measured.contains(p.id.as_str()))
            .map(|p| p.original_id.clone())
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub purchases: usize,
    pub sub_items: usize,
    pub measurements: usize,
    pub format_errors: usize,
    pub unresolved: usize,
    pub unit_count: CountCheck,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Purchases: {} | Sub-items: {} | Measurements: {}",
            self.purchases, self.sub_items, self.measurements
        )?;
        writeln!(
            f,
            "Format errors: {} | Unresolved batches: {}",
            self.format_errors, self.unresolved
        )?;
        write!(
            f,
            "Unit count verification: {}\n{}",
            self.unit_count.status.as_str(),
            self.unit_count.message()
        )
    }
}
