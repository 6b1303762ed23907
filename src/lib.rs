//! # Tabula
//!
//! Runs report queries against heterogeneous data engines, normalizes every
//! result into one tabular shape and renders charts from it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        Settings (systems, limits) + ReportDefinition     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [report::ReportRunner]
//! ┌─────────────────────────────────────────────────────────┐
//! │   engine::QueryExecutor  (timeout, retry, cancellation)  │
//! │   AdapterRegistry: postgres, mysql, sqlite, bigquery,    │
//! │   snowflake, sqlserver + duckdb (worker process)         │
//! └─────────────────────────────────────────────────────────┘
//!                          │ RawEngineResult
//!                          ▼ [tabular::normalize]
//! ┌─────────────────────────────────────────────────────────┐
//! │    UniversalTabularResult (FLOAT | STRING, text cells)   │
//! └─────────────────────────────────────────────────────────┘
//!               │                              │
//!               ▼ report data                  ▼ [chart::prepare]
//!        template compiler          ChartRenderer ──► PNG files
//! ```
//!
//! Nothing in the library reads global configuration or installs a logging
//! subscriber; settings and credentials are loaded once and passed down.

pub mod chart;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod report;
pub mod tabular;
pub mod worker;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::chart::{ChartDescriptor, ChartError, ChartRenderer};
    pub use crate::config::{Settings, SettingsError, SystemConfig};
    pub use crate::crypto::MasterKey;
    pub use crate::engine::{
        Adapter, AdapterRegistry, EngineError, EngineKind, ExecutionPolicy, QueryExecutor,
        QueryOutcome,
    };
    pub use crate::report::{ReportDefinition, ReportError, ReportOutput, ReportRunner};
    pub use crate::tabular::{normalize, ColumnType, UniversalTabularResult, Warning};
}
