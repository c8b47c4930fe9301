use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use crate::error::{AppError, Result};
use crate::types::{
    BatchRow, CollectionSnapshot, StatRow, StatValue, StatsBatch, COLLECTION_COLUMN,
    TIMESTAMP_COLUMN,
};

/// Pivot one collection's long-form stats into a single wide row keyed by
/// stat name. A stat name seen twice is an error, as is one that would share
/// a SQLite column (case-insensitive) with another stat or a key column.
pub fn pivot(row: &StatRow) -> Result<CollectionSnapshot> {
    let mut stats = BTreeMap::new();
    let mut folded: HashMap<String, &str> = HashMap::new();
    for key in [TIMESTAMP_COLUMN, COLLECTION_COLUMN] {
        folded.insert(key.to_ascii_lowercase(), key);
    }

    for (name, value) in &row.entries {
        match stats.entry(name.clone()) {
            Entry::Vacant(slot) => {
                if let Some(column) = folded.get(&name.to_ascii_lowercase()) {
                    return Err(AppError::ColumnCollision {
                        collection: row.collection.clone(),
                        stat: name.clone(),
                        column: column.to_string(),
                    });
                }
                folded.insert(name.to_ascii_lowercase(), name.as_str());
                slot.insert(value.clone());
            }
            Entry::Occupied(_) => {
                return Err(AppError::DuplicateStat {
                    collection: row.collection.clone(),
                    stat: name.clone(),
                });
            }
        }
    }

    Ok(CollectionSnapshot {
        timestamp: row.timestamp,
        collection: row.collection.clone(),
        stats,
    })
}

/// Stack snapshots row-wise. Stat columns are the union over all snapshots in
/// order of first appearance; cells a collection did not report are `Null`.
/// Two collections spelling one stat with different ASCII case is an error.
pub fn stack(snapshots: Vec<CollectionSnapshot>) -> Result<StatsBatch> {
    let mut stat_columns: Vec<String> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for snap in &snapshots {
        for name in snap.stats.keys() {
            let folded = name.to_ascii_lowercase();
            match index.get(&folded) {
                Some(&col) if stat_columns[col] != *name => {
                    return Err(AppError::ColumnCollision {
                        collection: snap.collection.clone(),
                        stat: name.clone(),
                        column: stat_columns[col].clone(),
                    });
                }
                Some(_) => {}
                None => {
                    index.insert(folded, stat_columns.len());
                    stat_columns.push(name.clone());
                }
            }
        }
    }

    let rows = snapshots
        .into_iter()
        .map(|snap| {
            let mut values = vec![StatValue::Null; stat_columns.len()];
            for (name, value) in snap.stats {
                // Every name was registered in the first pass.
                if let Some(&col) = index.get(&name.to_ascii_lowercase()) {
                    values[col] = value;
                }
            }
            BatchRow {
                timestamp: snap.timestamp,
                collection: snap.collection,
                values,
            }
        })
        .collect();

    Ok(StatsBatch { stat_columns, rows })
}

/// Pivot every row and stack the results, failing on the first bad row.
pub fn reshape(rows: &[StatRow]) -> Result<StatsBatch> {
    let snapshots = rows.iter().map(pivot).collect::<Result<Vec<_>>>()?;
    stack(snapshots)
}
