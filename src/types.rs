use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Run timestamp
// ---------------------------------------------------------------------------

/// Capture instant shared by every row of one run. Taken once, before the
/// first request, and reused across retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RunTimestamp(DateTime<Utc>);

impl RunTimestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl fmt::Display for RunTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.6f"))
    }
}

// ---------------------------------------------------------------------------
// Stat values
// ---------------------------------------------------------------------------

/// A single scalar stat as returned by the API.
#[derive(Debug, Clone, PartialEq)]
pub enum StatValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl StatValue {
    /// Text stored in the table; `None` becomes SQL NULL.
    pub fn to_sql_text(&self) -> Option<String> {
        match self {
            StatValue::Null => None,
            StatValue::Bool(b) => Some(b.to_string()),
            StatValue::Number(n) => Some(n.to_string()),
            StatValue::Text(s) => Some(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StatValue::Null)
    }
}

impl TryFrom<serde_json::Value> for StatValue {
    type Error = String;

    fn try_from(v: serde_json::Value) -> std::result::Result<Self, Self::Error> {
        match v {
            serde_json::Value::Null => Ok(StatValue::Null),
            serde_json::Value::Bool(b) => Ok(StatValue::Bool(b)),
            serde_json::Value::Number(n) => Ok(StatValue::Number(n)),
            serde_json::Value::String(s) => Ok(StatValue::Text(s)),
            serde_json::Value::Array(_) => Err("array".to_string()),
            serde_json::Value::Object(_) => Err("object".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// API payload
// ---------------------------------------------------------------------------

/// `{"stats": {...}}` body of the collection stats endpoint. Other top-level
/// keys are ignored.
#[derive(Debug, Deserialize)]
pub struct StatsEnvelope {
    pub stats: StatEntries,
}

/// The `stats` object in document order. Repeated keys are kept so the
/// reshaper can reject them instead of silently keeping the last one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatEntries(pub Vec<(String, StatValue)>);

impl<'de> Deserialize<'de> for StatEntries {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = StatEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping stat names to scalar values")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<StatEntries, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, raw)) = map.next_entry::<String, serde_json::Value>()? {
                    let value = StatValue::try_from(raw).map_err(|kind| {
                        de::Error::custom(format!("stat '{name}' is an {kind}, expected a scalar"))
                    })?;
                    entries.push((name, value));
                }
                Ok(StatEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

/// Long-form stats for one collection: one (name, value) pair per stat.
#[derive(Debug, Clone, PartialEq)]
pub struct StatRow {
    pub collection: String,
    pub timestamp: RunTimestamp,
    pub entries: Vec<(String, StatValue)>,
}

/// Wide-form stats for one collection. `stats` is keyed and ordered by stat
/// name.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    pub timestamp: RunTimestamp,
    pub collection: String,
    pub stats: BTreeMap<String, StatValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    pub timestamp: RunTimestamp,
    pub collection: String,
    /// Aligned with `StatsBatch::stat_columns`; absent stats are `Null`.
    pub values: Vec<StatValue>,
}

/// All collections of one run stacked into a single wide table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsBatch {
    /// Stat names in order of first appearance across snapshots.
    pub stat_columns: Vec<String>,
    pub rows: Vec<BatchRow>,
}

pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const COLLECTION_COLUMN: &str = "collection";

impl StatsBatch {
    /// Full column list: `timestamp`, `collection`, then every stat column.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = Vec::with_capacity(self.stat_columns.len() + 2);
        cols.push(TIMESTAMP_COLUMN);
        cols.push(COLLECTION_COLUMN);
        cols.extend(self.stat_columns.iter().map(String::as_str));
        cols
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stat cell for `collection`, or `None` when the collection or column is
    /// not part of the batch.
    pub fn value(&self, collection: &str, stat: &str) -> Option<&StatValue> {
        let col = self.stat_columns.iter().position(|c| c == stat)?;
        let row = self.rows.iter().find(|r| r.collection == collection)?;
        row.values.get(col)
    }

    /// One row rendered as SQL text, aligned with `columns()`.
    pub fn text_row(&self, idx: usize) -> Option<Vec<Option<String>>> {
        let row = self.rows.get(idx)?;
        let mut out = Vec::with_capacity(row.values.len() + 2);
        out.push(Some(row.timestamp.to_string()));
        out.push(Some(row.collection.clone()));
        out.extend(row.values.iter().map(StatValue::to_sql_text));
        Some(out)
    }
}
