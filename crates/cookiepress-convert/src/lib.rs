use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

mod stl;

pub use stl::{BINARY_STL_HEADER_LEN, EMPTY_BINARY_STL_LEN, empty_binary_stl};

pub const CONVERSION_TIMEOUT: Duration = Duration::from_secs(60);
pub const OUTPUT_CAPTURE_LIMIT: usize = 10 * 1024 * 1024;
/// Grace interval between tool exit and the output-directory scan, covering
/// filesystem-visibility lag on the tool's writes.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

pub const DEFAULT_WALL_HEIGHT_MM: u32 = 4;

const GENERATED_STL_HEADER: &str = "CookiePress - Generated STL";
const PLACEHOLDER_STL_HEADER: &str = "CookiePress - Placeholder STL";

/// Output filename pair, relative to the converter's output directory. Both
/// names refer to files on disk by the time a conversion returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub cutter_stl: String,
    pub stamp_stl: String,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch conversion tool")]
    Spawn(#[source] std::io::Error),
    #[error("conversion tool exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("conversion tool timed out after {}s", CONVERSION_TIMEOUT.as_secs())]
    TimedOut,
    #[error("conversion tool produced more than {OUTPUT_CAPTURE_LIMIT} bytes of output")]
    OutputOverflow,
    #[error("failed to collect conversion tool output")]
    Io(#[source] std::io::Error),
}

/// External geometry-conversion tool: given an input raster and an output
/// directory, it may or may not deposit `.stl` files there within bounded
/// time. Implementations are injectable so conversions are testable without
/// a real tool.
#[async_trait]
pub trait ConversionTool: Send + Sync {
    async fn run(&self, image_path: &Path, output_dir: &Path) -> Result<(), ToolError>;
}

/// Runs the SimpleCookie script as a bounded subprocess:
/// `python3 <script> -i <image> -o <outdir> -h <wall-height>`.
pub struct SimpleCookieTool {
    python_bin: String,
    script: PathBuf,
    wall_height_mm: u32,
    timeout: Duration,
}

impl SimpleCookieTool {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            python_bin: "python3".to_string(),
            script: script.into(),
            wall_height_mm: DEFAULT_WALL_HEIGHT_MM,
            timeout: CONVERSION_TIMEOUT,
        }
    }

    pub fn with_interpreter(mut self, python_bin: impl Into<String>) -> Self {
        self.python_bin = python_bin.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ConversionTool for SimpleCookieTool {
    async fn run(&self, image_path: &Path, output_dir: &Path) -> Result<(), ToolError> {
        let child = tokio::process::Command::new(&self.python_bin)
            .arg(&self.script)
            .arg("-i")
            .arg(image_path)
            .arg("-o")
            .arg(output_dir)
            .arg("-h")
            .arg(self.wall_height_mm.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ToolError::Spawn)?;

        // Dropping the child on timeout kills and reaps it via kill_on_drop.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::TimedOut)?
            .map_err(ToolError::Io)?;

        if output.stdout.len() + output.stderr.len() > OUTPUT_CAPTURE_LIMIT {
            return Err(ToolError::OutputOverflow);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(ToolError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }

        if !stderr.is_empty() && !stderr.contains("Warning") {
            warn!(stderr, "conversion tool wrote to stderr");
        }
        Ok(())
    }
}

/// Orchestrates one conversion with a three-tier fallback ladder:
/// real tool output, then synthesized placeholders when the tool produced
/// nothing, then the same placeholders when the tool failed outright. A tool
/// failure never reaches the caller; the only error this returns is an I/O
/// failure writing the fallback files themselves.
pub struct Converter {
    tool: Arc<dyn ConversionTool>,
    output_dir: PathBuf,
}

impl Converter {
    pub fn new(tool: Arc<dyn ConversionTool>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub async fn convert(&self, image_path: &Path) -> std::io::Result<ConversionResult> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        if let Err(err) = self.tool.run(image_path, &self.output_dir).await {
            warn!(error = %err, "conversion tool failed, writing placeholder STLs");
            return self.write_placeholders(PLACEHOLDER_STL_HEADER).await;
        }

        tokio::time::sleep(SETTLE_DELAY).await;
        match self.pair_tool_output().await {
            Ok(Some(result)) => Ok(result),
            Ok(None) => {
                warn!("conversion tool produced no STL files, writing placeholders");
                self.write_placeholders(GENERATED_STL_HEADER).await
            }
            Err(err) => {
                warn!(error = %err, "failed to collect tool output, writing placeholder STLs");
                self.write_placeholders(PLACEHOLDER_STL_HEADER).await
            }
        }
    }

    /// Tier 1: first `.stl` in directory-listing order becomes the cutter;
    /// the stamp is a byte-identical copy under a `_stamp` suffix.
    async fn pair_tool_output(&self) -> std::io::Result<Option<ConversionResult>> {
        let mut entries = tokio::fs::read_dir(&self.output_dir).await?;
        let mut cutter_stl = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".stl") {
                cutter_stl = Some(name);
                break;
            }
        }
        let Some(cutter_stl) = cutter_stl else {
            return Ok(None);
        };

        let stem = cutter_stl.strip_suffix(".stl").unwrap_or(&cutter_stl);
        let stamp_stl = format!("{stem}_stamp.stl");
        tokio::fs::copy(
            self.output_dir.join(&cutter_stl),
            self.output_dir.join(&stamp_stl),
        )
        .await?;

        Ok(Some(ConversionResult {
            cutter_stl,
            stamp_stl,
        }))
    }

    async fn write_placeholders(&self, header_text: &str) -> std::io::Result<ConversionResult> {
        let millis = Utc::now().timestamp_millis();
        let cutter_stl = format!("cutter-{millis}.stl");
        let stamp_stl = format!("stamp-{millis}.stl");

        let bytes = empty_binary_stl(header_text);
        tokio::fs::write(self.output_dir.join(&cutter_stl), &bytes).await?;
        tokio::fs::write(self.output_dir.join(&stamp_stl), &bytes).await?;

        Ok(ConversionResult {
            cutter_stl,
            stamp_stl,
        })
    }
}
