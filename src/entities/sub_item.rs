// 🥫 SubItem - one tracked variant (flavor) within a purchase

use super::{date_value, EntityKind, Record};
use crate::db::text_value;
use crate::normalize::SourceRow;
use chrono::NaiveDate;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubItem {
    pub id: String,
    pub purchase_id: String,
    pub category: Option<String>,
    pub started_at: Option<NaiveDate>,
    pub finished_at: Option<NaiveDate>,
    /// Set once at least one measurement references this sub-item
    pub has_measurements: bool,
}

impl SubItem {
    pub fn from_source(id: String, purchase_id: String, row: &SourceRow) -> Self {
        SubItem {
            id,
            purchase_id,
            category: row.category.clone(),
            started_at: row.started_at,
            finished_at: row.finished_at,
            has_measurements: false,
        }
    }
}

impl Record for SubItem {
    const KIND: EntityKind = EntityKind::SubItem;
    const FIELDS: &'static [&'static str] = &[
        "id",
        "purchase_id",
        "category",
        "started_at",
        "finished_at",
        "has_measurements",
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.id.clone()),
            Value::Text(self.purchase_id.clone()),
            text_value(self.category.as_deref()),
            date_value(self.started_at),
            date_value(self.finished_at),
            Value::Integer(self.has_measurements as i64),
        ]
    }
}
