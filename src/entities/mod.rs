// Entity Models - Purchase → SubItem → Measurement
//
// Each record type declares its column list once (`Record::FIELDS`) and
// produces insert values in exactly that order. Field order on the struct
// does not matter.

pub mod purchase;
pub mod sub_item;
pub mod measurement;

pub use purchase::Purchase;
pub use sub_item::SubItem;
pub use measurement::Measurement;

use crate::db::Frame;
use chrono::NaiveDate;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

// ============================================================================
// ENTITY KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Purchase,
    SubItem,
    Measurement,
}

impl EntityKind {
    /// Table in the raw store
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Purchase => "purchases",
            EntityKind::SubItem => "sub_items",
            EntityKind::Measurement => "measurements",
        }
    }

    pub fn primary_key(&self) -> &'static str {
        self.fields()[0]
    }

    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Purchase => Purchase::FIELDS,
            EntityKind::SubItem => SubItem::FIELDS,
            EntityKind::Measurement => Measurement::FIELDS,
        }
    }

    /// Load order (parents first)
    pub fn all() -> [EntityKind; 3] {
        [EntityKind::Purchase, EntityKind::SubItem, EntityKind::Measurement]
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

// ============================================================================
// RECORD
// ============================================================================

pub trait Record {
    const KIND: EntityKind;
    /// Column order for inserts; the first field is the primary key
    const FIELDS: &'static [&'static str];

    /// One value per `FIELDS` entry, same order
    fn values(&self) -> Vec<Value>;
}

/// Records → bulk-load frame
pub fn to_frame<R: Record>(records: &[R]) -> Frame {
    let mut frame = Frame::new(R::FIELDS.iter().copied());
    frame.rows = records.iter().map(Record::values).collect();
    frame
}

/// Dates are stored as ISO `YYYY-MM-DD` text
pub fn date_value(date: Option<NaiveDate>) -> Value {
    date.map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null)
}

pub fn parse_stored_date(text: Option<&str>) -> Option<NaiveDate> {
    text.and_then(|t| NaiveDate::parse_from_str(t, "%Y-%m-%d").ok())
}
