//! The universal tabular result and the normalizer that produces it.
//!
//! Every engine adapter hands back a [`RawEngineResult`](crate::engine::RawEngineResult)
//! in whatever shape the engine produced. This module turns that into one
//! deterministic, engine-independent model:
//!
//! ```text
//! RawEngineResult ──[normalize]──► UniversalTabularResult ──► report output
//!   fields (kind?)                   columns  (unique)          │
//!   rows (positional NativeValue)    types    (FLOAT|STRING)    └──► chart::prepare
//!                                    rows     (column → text)
//! ```
//!
//! All cells are stored as text. The column type tells consumers whether the
//! text is numeric; the normalizer never looks at values to decide that.

mod format;
mod normalize;
mod warning;

pub use format::{format_float, format_value};
pub use normalize::{normalize, Normalized, MISSING_VALUE_SENTINEL};
pub use warning::Warning;

use std::collections::HashSet;
use std::fmt;

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Column type of a normalized result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    /// Numeric column. Cells hold decimal text.
    Float,
    /// Everything else.
    String,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Float => "FLOAT",
            ColumnType::String => "STRING",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised when a tabular result would violate its invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TabularError {
    #[error("{columns} columns but {types} types")]
    LengthMismatch { columns: usize, types: usize },

    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("row {row} has {found} values, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("row {row} is missing column {column}")]
    MissingColumn { row: usize, column: String },

    #[error("row {row} has unknown column {column}")]
    UnexpectedColumn { row: usize, column: String },

    #[error("row {row} column {column} is not a string")]
    NonStringCell { row: usize, column: String },
}

/// Engine-independent query result.
///
/// Rows are stored positionally and always have exactly one cell per column,
/// so the key set of every row equals `columns` by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct UniversalTabularResult {
    columns: Vec<String>,
    types: Vec<ColumnType>,
    rows: Vec<Vec<String>>,
    query: Option<String>,
}

impl UniversalTabularResult {
    /// Build a result, checking every invariant.
    ///
    /// # Errors
    ///
    /// Returns a [`TabularError`] if the column and type lists differ in
    /// length, a column name repeats, or a row has the wrong width.
    pub fn new(
        columns: Vec<String>,
        types: Vec<ColumnType>,
        rows: Vec<Vec<String>>,
    ) -> Result<Self, TabularError> {
        if columns.len() != types.len() {
            return Err(TabularError::LengthMismatch {
                columns: columns.len(),
                types: types.len(),
            });
        }

        let mut seen = HashSet::with_capacity(columns.len());
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(TabularError::DuplicateColumn(name.clone()));
            }
        }

        for (index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(TabularError::RowWidth {
                    row: index,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
        }

        Ok(Self {
            columns,
            types,
            rows,
            query: None,
        })
    }

    /// A result with no columns and no rows.
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            types: Vec::new(),
            rows: Vec::new(),
            query: None,
        }
    }

    /// Attach the originating query text.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn types(&self) -> &[ColumnType] {
        &self.types
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Type of the named column.
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.column_index(name).map(|i| self.types[i])
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Row at `index`.
    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Rows in engine return order.
    pub fn rows(&self) -> impl ExactSizeIterator<Item = Row<'_>> + '_ {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }
}

/// Borrowed view of one normalized row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [String],
}

impl<'a> Row<'a> {
    /// Cell value for a column name.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| self.values[i].as_str())
    }

    /// `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let columns = self.columns;
        let values = self.values;
        columns
            .iter()
            .zip(values.iter())
            .map(|(c, v)| (c.as_str(), v.as_str()))
    }

    pub fn values(&self) -> &'a [String] {
        self.values
    }
}

struct RowMap<'a>(Row<'a>);

impl Serialize for RowMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.values.len()))?;
        for (column, value) in self.0.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

struct RowList<'a>(&'a UniversalTabularResult);

impl Serialize for RowList<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.rows().map(RowMap))
    }
}

impl Serialize for UniversalTabularResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("UniversalTabularResult", 4)?;
        state.serialize_field("columns", &self.columns)?;
        state.serialize_field("types", &self.types)?;
        state.serialize_field("rows", &RowList(self))?;
        state.serialize_field("query", &self.query)?;
        state.end()
    }
}

/// Wire shape accepted when reading a saved result back in.
#[derive(Deserialize)]
struct TabularRepr {
    columns: Vec<String>,
    types: Vec<ColumnType>,
    #[serde(default)]
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    query: Option<String>,
}

impl TryFrom<TabularRepr> for UniversalTabularResult {
    type Error = TabularError;

    fn try_from(repr: TabularRepr) -> Result<Self, Self::Error> {
        let mut rows = Vec::with_capacity(repr.rows.len());
        for (index, mut record) in repr.rows.into_iter().enumerate() {
            let mut values = Vec::with_capacity(repr.columns.len());
            for column in &repr.columns {
                match record.remove(column) {
                    Some(serde_json::Value::String(s)) => values.push(s),
                    Some(_) => {
                        return Err(TabularError::NonStringCell {
                            row: index,
                            column: column.clone(),
                        })
                    }
                    None => {
                        return Err(TabularError::MissingColumn {
                            row: index,
                            column: column.clone(),
                        })
                    }
                }
            }
            if let Some(extra) = record.keys().next() {
                return Err(TabularError::UnexpectedColumn {
                    row: index,
                    column: extra.clone(),
                });
            }
            rows.push(values);
        }

        let result = UniversalTabularResult::new(repr.columns, repr.types, rows)?;
        Ok(match repr.query {
            Some(query) => result.with_query(query),
            None => result,
        })
    }
}

impl<'de> Deserialize<'de> for UniversalTabularResult {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = TabularRepr::deserialize(deserializer)?;
        UniversalTabularResult::try_from(repr).map_err(serde::de::Error::custom)
    }
}
