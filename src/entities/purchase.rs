// 🛒 Purchase - one box/pack acquisition

use super::{date_value, EntityKind, Record};
use crate::db::{real_value, text_value};
use crate::normalize::SourceRow;
use chrono::NaiveDate;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    /// Minted surrogate id
    pub id: String,
    /// Base natural key shared by every variant in the pack
    pub original_id: String,
    pub acquired_at: Option<NaiveDate>,
    pub price: Option<f64>,
    /// Purchase location code (`CCO`, `WLG`, ...)
    pub channel: Option<String>,
}

impl Purchase {
    /// Purchase fields come from the first source row of the group
    pub fn from_source(id: String, row: &SourceRow) -> Self {
        Purchase {
            id,
            original_id: row.base_original_id.clone(),
            acquired_at: row.acquired_at,
            price: row.price,
            channel: row.channel.clone(),
        }
    }

    pub fn is_channel(&self, channel: &str) -> bool {
        self.channel.as_deref() == Some(channel)
    }
}

impl Record for Purchase {
    const KIND: EntityKind = EntityKind::Purchase;
    const FIELDS: &'static [&'static str] = &["id", "original_id", "acquired_at", "price", "channel"];

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.id.clone()),
            Value::Text(self.original_id.clone()),
            date_value(self.acquired_at),
            real_value(self.price),
            text_value(self.channel.as_deref()),
        ]
    }
}
