//! Report definitions loaded from TOML or JSON.
//!
//! ```toml
//! name = "Daily sales"
//! default_system = "orders"
//!
//! [[data]]
//! query = "SELECT region, SUM(total) AS total FROM sales GROUP BY 1"
//!
//! [[chart]]
//! title = "Revenue by region"
//! query_file = "queries/revenue.sql"
//! spec_file = "charts/revenue.vl.json"
//! ```
//!
//! Relative `query_file` and `spec_file` paths resolve against the directory
//! holding the definition.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ReportError, ReportResult};

/// File names probed when a report path is a directory.
pub const REPORT_FILE_NAMES: [&str; 2] = ["report.toml", "report.json"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportDefinition {
    pub name: String,

    /// System for items that name none.
    #[serde(default)]
    pub default_system: Option<String>,

    #[serde(default)]
    pub data: Vec<DataItem>,

    #[serde(default, rename = "chart")]
    pub charts: Vec<ChartItem>,
}

/// A query whose result goes into the report as data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub query_file: Option<String>,
}

/// A query whose result is drawn as a chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartItem {
    #[serde(default)]
    pub title: Option<String>,
    /// Content id used to reference the image from the report document.
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub query_file: Option<String>,
    /// Inline spec: a JSON object, or a string holding one.
    #[serde(default)]
    pub spec: Option<Value>,
    #[serde(default)]
    pub spec_file: Option<String>,
}

/// One query of a report with its system and text resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub system: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedData {
    pub name: Option<String>,
    pub query: ResolvedQuery,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChart {
    pub title: Option<String>,
    pub cid: String,
    pub query: ResolvedQuery,
    pub spec: Value,
}

/// A definition with every file read and every default applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedReport {
    pub name: String,
    pub data: Vec<ResolvedData>,
    pub charts: Vec<ResolvedChart>,
}

impl ReportDefinition {
    pub fn from_toml(content: &str) -> ReportResult<Self> {
        toml::from_str(content).map_err(|e| ReportError::InvalidDefinition(e.to_string()))
    }

    pub fn from_json(content: &str) -> ReportResult<Self> {
        serde_json::from_str(content).map_err(|e| ReportError::InvalidDefinition(e.to_string()))
    }

    /// Load a definition from a file, or from a directory holding
    /// `report.toml` or `report.json`.
    ///
    /// Returns the definition with the directory its relative paths resolve
    /// against.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Io`] when nothing can be read at `path` and
    /// [`ReportError::InvalidDefinition`] when the content does not parse.
    pub fn load<P: AsRef<Path>>(path: P) -> ReportResult<(Self, PathBuf)> {
        let path = path.as_ref();
        let file = if path.is_dir() {
            REPORT_FILE_NAMES
                .iter()
                .map(|name| path.join(name))
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| ReportError::InvalidDefinition(format!(
                    "no {} in {}",
                    REPORT_FILE_NAMES.join(" or "),
                    path.display()
                )))?
        } else {
            path.to_path_buf()
        };

        let content = read(&file)?;
        let definition = match file.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json(&content)?,
            _ => Self::from_toml(&content)?,
        };

        let base_dir = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok((definition, base_dir))
    }

    /// Apply the default system and read every referenced file.
    ///
    /// Chart items without a `cid` get `chart_<index>`.
    ///
    /// # Errors
    ///
    /// * [`ReportError::InvalidDefinition`] - an item has no system, no
    ///   query, both `query` and `query_file`, or no spec
    /// * [`ReportError::Io`] - a referenced file cannot be read
    pub fn resolve(&self, base_dir: &Path) -> ReportResult<ResolvedReport> {
        let data = self
            .data
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let label = format!("data[{index}]");
                Ok(ResolvedData {
                    name: item.name.clone(),
                    query: self.resolve_query(
                        &label,
                        item.system.as_deref(),
                        item.query.as_deref(),
                        item.query_file.as_deref(),
                        base_dir,
                    )?,
                })
            })
            .collect::<ReportResult<Vec<_>>>()?;

        let charts = self
            .charts
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let label = format!("chart[{index}]");
                let query = self.resolve_query(
                    &label,
                    item.system.as_deref(),
                    item.query.as_deref(),
                    item.query_file.as_deref(),
                    base_dir,
                )?;
                let spec = match (&item.spec, &item.spec_file) {
                    (Some(_), Some(_)) => {
                        return Err(ReportError::InvalidDefinition(format!(
                            "{label}: set spec or spec_file, not both"
                        )))
                    }
                    (Some(inline), None) => decode_spec(inline.clone()),
                    (None, Some(file)) => decode_spec(Value::String(read(&base_dir.join(file))?)),
                    (None, None) => {
                        return Err(ReportError::InvalidDefinition(format!("{label}: no chart spec")))
                    }
                };
                Ok(ResolvedChart {
                    title: item.title.clone(),
                    cid: item.cid.clone().unwrap_or_else(|| format!("chart_{index}")),
                    query,
                    spec,
                })
            })
            .collect::<ReportResult<Vec<_>>>()?;

        Ok(ResolvedReport {
            name: self.name.clone(),
            data,
            charts,
        })
    }

    fn resolve_query(
        &self,
        label: &str,
        system: Option<&str>,
        query: Option<&str>,
        query_file: Option<&str>,
        base_dir: &Path,
    ) -> ReportResult<ResolvedQuery> {
        let system = system
            .or(self.default_system.as_deref())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                ReportError::InvalidDefinition(format!("{label}: no system and no default_system"))
            })?;

        let query = match (query, query_file) {
            (Some(_), Some(_)) => {
                return Err(ReportError::InvalidDefinition(format!(
                    "{label}: set query or query_file, not both"
                )))
            }
            (Some(inline), None) => inline.to_string(),
            (None, Some(file)) => read(&base_dir.join(file))?,
            (None, None) => {
                return Err(ReportError::InvalidDefinition(format!("{label}: no query")))
            }
        };

        Ok(ResolvedQuery {
            system: system.to_string(),
            query,
        })
    }
}

/// A string spec is JSON text; if it does not parse it is kept as a string
/// so that compiling the chart reports the problem.
fn decode_spec(spec: Value) -> Value {
    match spec {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    }
}

fn read(path: &Path) -> ReportResult<String> {
    fs::read_to_string(path).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}
