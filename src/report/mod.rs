//! Report runner.
//!
//! A report is a list of data items and chart items, each naming a system
//! and a query:
//!
//! ```text
//! ReportDefinition ──[resolve]──► queries (data items, then chart items)
//!                                      │
//!                                      ▼  QueryExecutor, bounded, in order
//!                               QueryOutcome per item
//!                                │                  │
//!                          data items          chart items
//!                                │                  │ prepare + render
//!                                ▼                  ▼
//!                              ReportOutput { data, charts, chart_failures }
//! ```
//!
//! Query failures abort the run. Chart failures only drop that chart.

pub mod definition;
mod runner;

pub use definition::{ChartItem, DataItem, ReportDefinition, ResolvedReport};
pub use runner::{ChartFailure, DataOutput, ReportOutput, ReportRunner};

use std::path::PathBuf;

use thiserror::Error;

use crate::config::SettingsError;
use crate::engine::EngineError;

pub type ReportResult<T> = Result<T, ReportError>;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Query error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid report definition: {0}")]
    InvalidDefinition(String),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Report run was cancelled")]
    Cancelled,
}
