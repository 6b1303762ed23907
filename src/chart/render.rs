//! Bounded, cancellable chart rendering to files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::compile::{compile, ChartPlan};
use super::raster::rasterize;
use super::{ChartError, ChartResult, ValueRecord};
use crate::config::ChartSettings;

/// Renders chart specs to PNG files.
///
/// Rasterization runs on blocking threads; at most `max_concurrent` charts
/// are rasterized at once across all clones of one renderer.
#[derive(Debug, Clone)]
pub struct ChartRenderer {
    permits: Arc<Semaphore>,
    default_width: u32,
    default_height: u32,
}

impl ChartRenderer {
    pub fn new(max_concurrent: usize, default_width: u32, default_height: u32) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            default_width,
            default_height,
        }
    }

    pub fn from_settings(settings: &ChartSettings) -> Self {
        Self::new(
            settings.max_concurrent_renders,
            settings.default_width,
            settings.default_height,
        )
    }

    /// Compile without rasterizing.
    pub fn compile(&self, spec: &Value, data: &[ValueRecord]) -> ChartResult<ChartPlan> {
        compile(spec, data, (self.default_width, self.default_height))
    }

    /// Compile and rasterize on the calling thread.
    pub fn render_png(&self, spec: &Value, data: &[ValueRecord]) -> ChartResult<Vec<u8>> {
        rasterize(&self.compile(spec, data)?)
    }

    /// Render `spec` over `data` into a PNG at `output`.
    ///
    /// The parent directory is created when missing. The image is written to
    /// a temporary sibling and renamed into place, so `output` either holds a
    /// complete image or is untouched.
    ///
    /// # Errors
    ///
    /// * [`ChartError::Compile`] - the spec is malformed; nothing is written
    /// * [`ChartError::Render`] - rasterizing or writing failed
    /// * [`ChartError::Cancelled`] - `cancel` fired before the file was in place
    ///
    /// Abandon a render by cancelling `cancel`. Dropping the future during
    /// the final write still lets the detached write finish.
    #[tracing::instrument(name = "chart.render", skip_all, fields(output = %output.display()))]
    pub async fn render(
        &self,
        spec: &Value,
        data: &[ValueRecord],
        output: &Path,
        cancel: &CancellationToken,
    ) -> ChartResult<PathBuf> {
        let plan = self.compile(spec, data)?;

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChartError::Cancelled),
            permit = self.permits.acquire() => {
                permit.map_err(|_| ChartError::Render("renderer closed".into()))?
            }
        };

        let png = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChartError::Cancelled),
            joined = tokio::task::spawn_blocking(move || rasterize(&plan)) => {
                joined.map_err(|e| ChartError::Render(e.to_string()))??
            }
        };

        let target = output.to_path_buf();
        let bytes = png.len();
        let token = cancel.clone();
        tokio::task::spawn_blocking(move || write_atomically(&target, &png, &token))
            .await
            .map_err(|e| ChartError::Render(e.to_string()))??;

        info!(bytes, "chart written");
        Ok(output.to_path_buf())
    }
}

/// The rename is skipped once `cancel` has fired.
fn write_atomically(path: &Path, bytes: &[u8], cancel: &CancellationToken) -> ChartResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .map_err(|e| ChartError::Render(format!("{}: {e}", parent.display())))?;

    // The temporary file is removed if anything below fails.
    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| ChartError::Render(format!("{}: {e}", parent.display())))?;
    temp.write_all(bytes)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| ChartError::Render(e.to_string()))?;
    if cancel.is_cancelled() {
        return Err(ChartError::Cancelled);
    }
    temp.persist(path)
        .map_err(|e| ChartError::Render(format!("{}: {}", path.display(), e.error)))?;
    Ok(())
}
