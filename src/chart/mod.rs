//! Chart pipeline.
//!
//! ```text
//! UniversalTabularResult ──[prepare]──► Vec<ValueRecord>
//!                                             │
//!            spec (Vega-Lite subset) ─────────┤
//!                                             ▼
//!                                   [compile] ChartPlan ──[rasterize]──► PNG bytes
//!                                                                           │
//!                                              ChartRenderer::render ───────┘──► file
//! ```
//!
//! Compilation is pure and fails fast on malformed specs. Rasterization is
//! deterministic: the same spec and records produce the same bytes.

mod compile;
mod prepare;
mod raster;
mod render;
pub mod scale;
pub mod spec;

pub use compile::{compile, ChartPlan, Paint, Primitive};
pub use prepare::prepare;
pub use raster::rasterize;
pub use render::ChartRenderer;
pub use spec::{bind_data, ChartSpec, MarkType};

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// One data row for a chart: column name to value, in column order.
pub type ValueRecord = serde_json::Map<String, Value>;

pub type ChartResult<T> = Result<T, ChartError>;

#[derive(Debug, Error)]
pub enum ChartError {
    /// The spec cannot be compiled against the data.
    #[error("chart spec error: {0}")]
    Compile(String),

    /// Rasterizing or writing the image failed.
    #[error("chart render error: {0}")]
    Render(String),

    #[error("chart rendering was cancelled")]
    Cancelled,
}

/// A chart of one report: spec, bound records and, once rendered, the image.
///
/// The image file belongs to whoever holds the descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct ChartDescriptor {
    pub title: Option<String>,
    pub cid: String,
    /// The spec with its `data` member replaced by `records`.
    pub spec: Value,
    pub records: Vec<ValueRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl ChartDescriptor {
    pub fn new(title: Option<String>, cid: impl Into<String>, spec: &Value, records: Vec<ValueRecord>) -> Self {
        Self {
            title,
            cid: cid.into(),
            spec: bind_data(spec, &records),
            records,
            path: None,
        }
    }
}
