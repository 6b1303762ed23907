//! Non-fatal findings recorded while adapting and normalizing results.

use std::fmt;

use serde::Serialize;

use super::ColumnType;

/// A recoverable data issue. Processing always continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// The engine reported no type for a column, so it was inferred from the
    /// first row.
    SchemaInference {
        system: String,
        column: String,
        inferred: ColumnType,
    },

    /// A row had no value (or SQL NULL) for a column and the sentinel was
    /// substituted.
    Coercion {
        system: String,
        column: String,
        row: usize,
    },
}

impl Warning {
    pub fn system(&self) -> &str {
        match self {
            Warning::SchemaInference { system, .. } | Warning::Coercion { system, .. } => system,
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Warning::SchemaInference { column, .. } | Warning::Coercion { column, .. } => column,
        }
    }

    pub fn is_coercion(&self) -> bool {
        matches!(self, Warning::Coercion { .. })
    }

    /// Emit the warning through `tracing`.
    pub(crate) fn log(&self) {
        match self {
            Warning::SchemaInference {
                system,
                column,
                inferred,
            } => tracing::warn!(%system, %column, %inferred, "column type inferred from first row"),
            Warning::Coercion {
                system,
                column,
                row,
            } => tracing::warn!(%system, %column, row, "missing value replaced with sentinel"),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::SchemaInference {
                system,
                column,
                inferred,
            } => write!(
                f,
                "{system}: no schema type for column '{column}', inferred {inferred}"
            ),
            Warning::Coercion {
                system,
                column,
                row,
            } => write!(f, "{system}: row {row} has no value for column '{column}'"),
        }
    }
}
