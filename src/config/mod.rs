//! Configuration module for Tabula.
//!
//! Handles named systems, execution limits, chart output and worker settings.

mod settings;
mod system;

pub use settings::{
    expand_env_vars, parse_duration, ChartSettings, ExecutionSettings, RetrySettings, Settings,
    SettingsError, WorkerSettings, CONFIG_ENV_VAR,
};
pub use system::SystemConfig;
