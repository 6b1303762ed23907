//! The external database worker.
//!
//! SQL Server and DuckDB have no driver in this crate. Queries for them go
//! to a separate worker binary (`worker.path` in `tabula.toml`) over its
//! stdin and stdout:
//!
//! ```text
//!   WorkerAdapter ──spawn──► worker process (mssql | duckdb driver)
//!        │                        ▲      │
//!        │   request line (JSON)  │      │ reply line (JSON)
//!        └────────────────────────┘      ▼
//!                              ExecuteQueryResponse
//! ```
//!
//! Each query gets its own process, killed when the [`WorkerClient`] drops.

mod client;
mod error;
pub mod protocol;

pub use client::WorkerClient;
pub use error::{WorkerError, WorkerResult};
