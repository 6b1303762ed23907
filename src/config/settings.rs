//! TOML-based configuration for Tabula.
//!
//! Supports a config file (tabula.toml) with environment variable expansion
//! and encrypted secrets.
//!
//! Example configuration:
//! ```toml
//! [systems.warehouse]
//! engine = "BigQuery"
//! project_id = "acme-analytics"
//! token = "${BQ_TOKEN}"
//!
//! [systems.orders]
//! engine = "postgres"
//! host = "db.internal"
//! database = "orders"
//! username = "report"
//! password = "enc:BASE64..."
//!
//! [execution]
//! query_timeout = "60s"
//! max_concurrent_queries = 2
//!
//! [execution.retry]
//! max_attempts = 3
//! initial_backoff = "250ms"
//! max_backoff = "5s"
//!
//! [charts]
//! output_dir = "/tmp"
//! max_concurrent_renders = 2
//!
//! [worker]
//! path = "./tabula-worker"
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::system::SystemConfig;
use crate::crypto::{CryptoError, MasterKey};
use crate::engine::{ExecutionPolicy, RetryPolicy};

/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV_VAR: &str = "TABULA_CONFIG";

const WORKER_BINARY: &str = "tabula-worker";

static ENV_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(?:\{([^}]*)\}|(\w+))").expect("valid env reference pattern"));

static DURATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*(ms|s|m|h)\s*$").expect("valid duration pattern"));

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Settings file {} does not exist", .0.display())]
    FileNotFound(PathBuf),

    #[error("Cannot read settings: {0}")]
    Read(#[from] std::io::Error),

    #[error("Malformed settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable {0} is referenced but not set")]
    MissingEnvVar(String),

    #[error("No system named '{0}' is configured")]
    ConfigNotFound(String),

    #[error("'{0}' is not a duration (expected e.g. 250ms, 60s, 5m, 1h)")]
    InvalidDuration(String),

    #[error("Invalid settings: {0}")]
    InvalidConfig(String),

    #[error("System '{0}' has encrypted values but no master key was provided")]
    MissingMasterKey(String),

    #[error("Failed to decrypt secret for system '{system}': {source}")]
    Crypto {
        system: String,
        #[source]
        source: CryptoError,
    },
}

/// Everything `tabula.toml` can hold. Every table is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Named systems, keyed by the name reports refer to.
    pub systems: BTreeMap<String, SystemConfig>,

    pub execution: ExecutionSettings,

    pub charts: ChartSettings,

    pub worker: WorkerSettings,
}

/// Query execution limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Per-attempt adapter timeout (e.g., "60s", "2m").
    pub query_timeout: String,

    /// Queries of one report that may run at once.
    pub max_concurrent_queries: usize,

    pub retry: RetrySettings,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            query_timeout: "60s".to_string(),
            max_concurrent_queries: 1,
            retry: RetrySettings::default(),
        }
    }
}

/// Backoff for connection failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: String,
    pub max_backoff: String,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: "250ms".to_string(),
            max_backoff: "5s".to_string(),
        }
    }
}

/// Chart rendering configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChartSettings {
    /// Directory for generated chart images. Defaults to the system temp dir.
    pub output_dir: Option<String>,

    /// Renders allowed on blocking threads at once.
    pub max_concurrent_renders: usize,

    /// Used when a spec has no `width`.
    pub default_width: u32,

    /// Used when a spec has no `height`.
    pub default_height: u32,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            output_dir: None,
            max_concurrent_renders: 2,
            default_width: 640,
            default_height: 400,
        }
    }
}

impl ChartSettings {
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir)
    }
}

/// Database worker configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Path to the worker binary.
    pub path: Option<String>,
}

impl Settings {
    /// Parse settings from TOML text.
    ///
    /// System names are filled in from their table keys and every duration
    /// and limit is checked. Secrets are left untouched; see
    /// [`Settings::resolve_secrets`].
    pub fn parse(content: &str) -> Result<Self, SettingsError> {
        let mut settings: Settings = toml::from_str(content)?;
        for (name, system) in settings.systems.iter_mut() {
            system.name = name.clone();
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Parse the file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(SettingsError::FileNotFound(path.to_path_buf()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Find and parse the settings file.
    ///
    /// `TABULA_CONFIG` wins when set, and a missing file there is an error.
    /// Otherwise the first of `./tabula.toml` and
    /// `<config dir>/tabula/config.toml` that exists is used. With neither
    /// present the defaults apply (no systems).
    pub fn load() -> Result<Self, SettingsError> {
        if let Some(path) = env::var_os(CONFIG_ENV_VAR) {
            return Self::from_file(path);
        }

        let user_config = dirs::config_dir().map(|dir| dir.join("tabula").join("config.toml"));
        match std::iter::once(PathBuf::from("tabula.toml"))
            .chain(user_config)
            .find(|candidate| candidate.is_file())
        {
            Some(path) => Self::from_file(path),
            None => Ok(Settings::default()),
        }
    }

    /// Expand environment variables and decrypt `enc:` values everywhere.
    pub fn resolve_secrets(&mut self, key: Option<&MasterKey>) -> Result<(), SettingsError> {
        for system in self.systems.values_mut() {
            system.resolve(key)?;
        }
        if let Some(path) = &self.worker.path {
            self.worker.path = Some(expand_env_vars(path)?);
        }
        if let Some(dir) = &self.charts.output_dir {
            self.charts.output_dir = Some(expand_env_vars(dir)?);
        }
        Ok(())
    }

    /// Look up a system by name, ignoring ASCII case.
    pub fn system(&self, name: &str) -> Result<&SystemConfig, SettingsError> {
        if let Some(system) = self.systems.get(name) {
            return Ok(system);
        }
        self.systems
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, system)| system)
            .ok_or_else(|| SettingsError::ConfigNotFound(name.to_string()))
    }

    /// Timeout and retry policy for query execution.
    pub fn execution_policy(&self) -> Result<ExecutionPolicy, SettingsError> {
        let retry = &self.execution.retry;
        Ok(ExecutionPolicy {
            timeout: parse_duration(&self.execution.query_timeout)?,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.max(1),
                initial_backoff: parse_duration(&retry.initial_backoff)?,
                max_backoff: parse_duration(&retry.max_backoff)?,
            },
        })
    }

    /// The worker binary: `worker.path` when set, else `tabula-worker`
    /// in the working directory, `./worker/`, or on `PATH`.
    pub fn worker_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.worker.path {
            return Some(PathBuf::from(path));
        }

        let local = [PathBuf::from(WORKER_BINARY), Path::new("worker").join(WORKER_BINARY)];
        let on_path = env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).map(|dir| dir.join(WORKER_BINARY)).collect::<Vec<_>>())
            .unwrap_or_default();

        local.into_iter().chain(on_path).find(|candidate| candidate.is_file())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        self.execution_policy()?;

        if self.execution.max_concurrent_queries == 0 {
            return Err(SettingsError::InvalidConfig(
                "execution.max_concurrent_queries must be at least 1".to_string(),
            ));
        }
        if self.charts.max_concurrent_renders == 0 {
            return Err(SettingsError::InvalidConfig(
                "charts.max_concurrent_renders must be at least 1".to_string(),
            ));
        }
        for (name, system) in &self.systems {
            if system.engine.trim().is_empty() {
                return Err(SettingsError::InvalidConfig(format!(
                    "system '{name}' has no engine"
                )));
            }
        }
        Ok(())
    }
}

/// Parse a duration such as `250ms`, `60s`, `5m` or `1h`.
pub fn parse_duration(s: &str) -> Result<Duration, SettingsError> {
    let captures = DURATION_PATTERN
        .captures(s)
        .ok_or_else(|| SettingsError::InvalidDuration(s.to_string()))?;

    let amount: u64 = captures[1]
        .parse()
        .map_err(|_| SettingsError::InvalidDuration(s.to_string()))?;

    let duration = match &captures[2] {
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        _ => Duration::from_secs(amount.saturating_mul(3600)),
    };
    Ok(duration)
}

/// Substitute `${VAR}` and `$VAR` references from the environment.
///
/// A `$` not followed by a name is kept as is.
///
/// # Errors
///
/// [`SettingsError::MissingEnvVar`] for the first unset variable.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut missing = None;
    let expanded = ENV_REFERENCE.replace_all(s, |caps: &regex::Captures<'_>| {
        let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        env::var(name).unwrap_or_else(|_| {
            missing.get_or_insert_with(|| name.to_string());
            String::new()
        })
    });

    match missing {
        Some(name) => Err(SettingsError::MissingEnvVar(name)),
        None => Ok(expanded.into_owned()),
    }
}
