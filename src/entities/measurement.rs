// ⚖️ Measurement - one weighed unit (can) within a sub-item

use super::{EntityKind, Record};
use crate::db::{real_value, text_value};
use crate::normalize::MeasurementRow;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// `<sequence>.<sub_item_id>`
    pub id: String,
    pub sub_item_id: String,
    pub initial_mass: Option<f64>,
    pub initial_volume: Option<f64>,
    pub final_mass: Option<f64>,
    pub final_volume: Option<f64>,
    /// Weighed empty container, when the source recorded one
    pub empty_can_mass: Option<f64>,
    /// Raw source status string
    pub finish_status: Option<String>,
}

impl Measurement {
    pub fn from_row(sub_item_id: &str, row: &MeasurementRow) -> Self {
        Measurement {
            id: format!("{}.{}", row.sequence, sub_item_id),
            sub_item_id: sub_item_id.to_string(),
            initial_mass: row.initial_mass,
            initial_volume: row.initial_volume,
            final_mass: row.final_mass,
            final_volume: row.final_volume,
            empty_can_mass: row.empty_can_mass,
            finish_status: row.finish_status.clone(),
        }
    }
}

impl Record for Measurement {
    const KIND: EntityKind = EntityKind::Measurement;
    const FIELDS: &'static [&'static str] = &[
        "id",
        "sub_item_id",
        "initial_mass",
        "initial_volume",
        "final_mass",
        "final_volume",
        "empty_can_mass",
        "finish_status",
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.id.clone()),
            Value::Text(self.sub_item_id.clone()),
            real_value(self.initial_mass),
            real_value(self.initial_volume),
            real_value(self.final_mass),
            real_value(self.final_volume),
            real_value(self.empty_can_mass),
            text_value(self.finish_status.as_deref()),
        ]
    }
}
