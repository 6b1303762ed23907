//! Tabula CLI - run reports, queries and charts
//!
//! Usage:
//!   tabula run <report_dir|report_file>
//!   tabula query --system <name> (--sql <text> | --file <path>) [--format json|table]
//!   tabula render --spec <file> --data <result.json> --output <png>
//!   tabula systems
//!   tabula generate-key
//!   tabula encrypt-secret <plaintext>
//!
//! Examples:
//!   tabula run reports/daily_sales
//!   tabula query --system orders --sql "SELECT 1 AS n" --format table
//!   TABULA_MASTER_KEY=... tabula encrypt-secret hunter2

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tabula::chart::{prepare, ChartError, ChartRenderer};
use tabula::config::{Settings, SettingsError};
use tabula::crypto::{CryptoError, MasterKey};
use tabula::engine::{AdapterRegistry, EngineError, EngineKind, QueryExecutor};
use tabula::report::{ReportDefinition, ReportError, ReportRunner};
use tabula::tabular::UniversalTabularResult;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the base64 master key for `enc:` secrets.
const MASTER_KEY_ENV_VAR: &str = "TABULA_MASTER_KEY";

/// Environment variable checked before `RUST_LOG`.
const LOG_ENV_VAR: &str = "TABULA_LOG";

#[derive(Parser)]
#[command(name = "tabula")]
#[command(about = "Tabula - run report queries across engines and render charts")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to TABULA_CONFIG, ./tabula.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a report and print its output as JSON
    Run {
        /// Report directory (holding report.toml or report.json) or definition file
        report: PathBuf,
    },

    /// Run one query and print the normalized result
    #[command(group(ArgGroup::new("source").required(true).args(["sql", "file"])))]
    Query {
        /// Configured system to query
        #[arg(short, long)]
        system: String,

        /// Query text
        #[arg(long)]
        sql: Option<String>,

        /// File holding the query text
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },

    /// Render one chart from a saved result
    Render {
        /// Chart spec (JSON)
        #[arg(long)]
        spec: PathBuf,

        /// Normalized result (JSON), as printed by `query`
        #[arg(long)]
        data: PathBuf,

        /// PNG to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List configured systems and their engines
    Systems,

    /// Print a new master key
    GenerateKey,

    /// Encrypt a secret with the key in TABULA_MASTER_KEY
    EncryptSecret {
        /// Value to encrypt
        plaintext: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Result as JSON
    Json,
    /// Aligned text table
    Table,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Chart(#[from] ChartError),

    #[error("TABULA_MASTER_KEY: {0}")]
    Crypto(#[from] CryptoError),

    #[error("TABULA_MASTER_KEY is not set")]
    MissingMasterKey,

    #[error("Failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize output: {0}")]
    Output(#[from] serde_json::Error),
}

type CliResult = Result<(), CliError>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run { report } => cmd_run(cli.config.as_deref(), &report).await,
        Commands::Query {
            system,
            sql,
            file,
            format,
        } => cmd_query(cli.config.as_deref(), &system, sql, file, format).await,
        Commands::Render { spec, data, output } => cmd_render(cli.config.as_deref(), &spec, &data, &output).await,
        Commands::Systems => cmd_systems(cli.config.as_deref()),
        Commands::GenerateKey => cmd_generate_key(),
        Commands::EncryptSecret { plaintext } => cmd_encrypt_secret(&plaintext),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        env::var(LOG_ENV_VAR)
            .ok()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Read the master key once; absent is fine until a secret needs it.
fn master_key() -> Result<Option<MasterKey>, CliError> {
    match env::var(MASTER_KEY_ENV_VAR) {
        Ok(encoded) if !encoded.trim().is_empty() => Ok(Some(MasterKey::from_base64(encoded.trim())?)),
        _ => Ok(None),
    }
}

fn load_settings(config: Option<&Path>) -> Result<Settings, CliError> {
    let mut settings = match config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::load()?,
    };
    settings.resolve_secrets(master_key()?.as_ref())?;
    Ok(settings)
}

/// A token cancelled on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

fn read_file(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    serde_json::from_str(&read_file(path)?).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

async fn cmd_run(config: Option<&Path>, report: &Path) -> CliResult {
    let settings = load_settings(config)?;
    let (definition, base_dir) = ReportDefinition::load(report)?;
    let runner = ReportRunner::new(settings)?;

    let output = runner.run(&definition, &base_dir, &cancel_on_interrupt()).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_query(
    config: Option<&Path>,
    system: &str,
    sql: Option<String>,
    file: Option<PathBuf>,
    format: OutputFormat,
) -> CliResult {
    let settings = load_settings(config)?;
    let query = match (sql, file) {
        (Some(sql), _) => sql,
        (None, Some(path)) => read_file(&path)?,
        // clap requires one of the two.
        (None, None) => String::new(),
    };

    let executor = QueryExecutor::new(
        AdapterRegistry::with_defaults(&settings).into(),
        settings.execution_policy()?,
    );
    let outcome = executor
        .run(settings.system(system)?, &query, &cancel_on_interrupt())
        .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome.result)?),
        OutputFormat::Table => print!("{}", format_table(&outcome.result)),
    }
    Ok(())
}

async fn cmd_render(config: Option<&Path>, spec: &Path, data: &Path, output: &Path) -> CliResult {
    let settings = match config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::load()?,
    };
    let spec: serde_json::Value = read_json(spec)?;
    let result: UniversalTabularResult = read_json(data)?;

    let renderer = ChartRenderer::from_settings(&settings.charts);
    let path = renderer
        .render(&spec, &prepare(&result), output, &cancel_on_interrupt())
        .await?;
    println!("{}", path.display());
    Ok(())
}

fn cmd_systems(config: Option<&Path>) -> CliResult {
    // Secrets are not needed to list systems.
    let settings = match config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::load()?,
    };

    if settings.systems.is_empty() {
        println!("No systems configured.");
        return Ok(());
    }

    for (name, system) in &settings.systems {
        match EngineKind::from_tag(&system.engine) {
            Some(kind) => println!("  {:<24} {}", name, kind),
            None => println!("  {:<24} {} (unsupported)", name, system.engine),
        }
    }
    Ok(())
}

fn cmd_generate_key() -> CliResult {
    println!("{}", MasterKey::generate()?.to_base64());
    Ok(())
}

fn cmd_encrypt_secret(plaintext: &str) -> CliResult {
    let key = master_key()?.ok_or(CliError::MissingMasterKey)?;
    println!("{}", key.encrypt_secret(plaintext)?);
    Ok(())
}

/// Left-aligned text columns, numeric columns right-aligned.
fn format_table(result: &UniversalTabularResult) -> String {
    let columns = result.columns();
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in result.rows() {
        for (width, value) in widths.iter_mut().zip(row.values()) {
            *width = (*width).max(value.chars().count());
        }
    }

    let line = |cells: &[String]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .zip(result.types())
            .map(|((cell, &width), kind)| {
                if kind.is_numeric() {
                    format!("{:>width$}", cell)
                } else {
                    format!("{:<width$}", cell)
                }
            })
            .collect();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let mut out = line(columns);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&format!("{}\n", rule.join("  ")));
    for row in result.rows() {
        out.push_str(&line(row.values()));
    }
    out.push_str(&format!("({} rows)\n", result.row_count()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula::tabular::ColumnType;

    #[test]
    fn test_format_table() {
        let result = UniversalTabularResult::new(
            vec!["region".into(), "total".into()],
            vec![ColumnType::String, ColumnType::Float],
            vec![
                vec!["north".into(), "10.5".into()],
                vec!["south".into(), "4".into()],
            ],
        )
        .unwrap();

        insta::assert_snapshot!(format_table(&result), @r"
        region  total
        ------  -----
        north    10.5
        south       4
        (2 rows)
        ");
    }

    #[test]
    fn test_cli_requires_query_source() {
        assert!(Cli::try_parse_from(["tabula", "query", "--system", "orders"]).is_err());
        assert!(Cli::try_parse_from(["tabula", "query", "--system", "orders", "--sql", "SELECT 1"]).is_ok());
    }
}
