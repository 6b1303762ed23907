//! Conversion of raw engine output into a [`UniversalTabularResult`].

use std::collections::HashSet;

use super::format::format_value;
use super::{ColumnType, UniversalTabularResult, Warning};
use crate::engine::{FieldDescriptor, RawEngineResult};

/// Cell text substituted for SQL NULL and for values a row lacks.
pub const MISSING_VALUE_SENTINEL: &str = "";

/// Output of [`normalize`].
#[derive(Debug, Clone)]
pub struct Normalized {
    pub result: UniversalTabularResult,
    /// Warnings recorded by the adapter followed by one coercion warning per
    /// substituted cell, in row-major order.
    pub warnings: Vec<Warning>,
}

/// Normalize one raw engine result.
///
/// Column types come only from the field descriptors. Rows are never dropped:
/// a missing or NULL value becomes [`MISSING_VALUE_SENTINEL`] and produces
/// exactly one [`Warning::Coercion`]. Values beyond the declared fields are
/// ignored.
///
/// # Arguments
///
/// * `system` - System name recorded in warnings
/// * `query` - Originating query text, kept on the result
/// * `raw` - Adapter output
pub fn normalize(system: &str, query: &str, raw: RawEngineResult) -> Normalized {
    let RawEngineResult {
        fields,
        rows,
        mut warnings,
    } = raw;

    let columns = unique_names(&fields);
    let types: Vec<ColumnType> = fields
        .iter()
        .map(|f| f.kind.unwrap_or(ColumnType::String))
        .collect();

    let mut normalized_rows = Vec::with_capacity(rows.len());
    for (row_index, row) in rows.into_iter().enumerate() {
        if row.len() > columns.len() {
            tracing::debug!(
                %system,
                row = row_index,
                extra = row.len() - columns.len(),
                "ignoring values beyond declared fields"
            );
        }

        let mut cells = Vec::with_capacity(columns.len());
        for (column_index, column) in columns.iter().enumerate() {
            match row.get(column_index).and_then(format_value) {
                Some(text) => cells.push(text),
                None => {
                    let warning = Warning::Coercion {
                        system: system.to_string(),
                        column: column.clone(),
                        row: row_index,
                    };
                    warning.log();
                    warnings.push(warning);
                    cells.push(MISSING_VALUE_SENTINEL.to_string());
                }
            }
        }
        normalized_rows.push(cells);
    }

    let result = UniversalTabularResult {
        columns,
        types,
        rows: normalized_rows,
        query: Some(query.to_string()),
    };

    Normalized { result, warnings }
}

/// Field names made unique as `name`, `name_2`, `name_3`, ...
fn unique_names(fields: &[FieldDescriptor]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::with_capacity(fields.len());
    let mut names = Vec::with_capacity(fields.len());

    for field in fields {
        let mut candidate = field.name.clone();
        let mut suffix = 2;
        while taken.contains(&candidate) {
            candidate = format!("{}_{}", field.name, suffix);
            suffix += 1;
        }
        taken.insert(candidate.clone());
        names.push(candidate);
    }

    names
}
