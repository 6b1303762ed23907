//! Universal tabular result → chart value records.

use serde_json::Value;

use super::ValueRecord;
use crate::tabular::UniversalTabularResult;

/// Project every row into a record keyed by column name, in column order.
///
/// Values are carried exactly as normalized; nothing is re-coerced. Zero
/// rows give an empty vector.
pub fn prepare(result: &UniversalTabularResult) -> Vec<ValueRecord> {
    result
        .rows()
        .map(|row| {
            row.iter()
                .map(|(column, value)| (column.to_string(), Value::String(value.to_string())))
                .collect()
        })
        .collect()
}
