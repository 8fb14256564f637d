//! Screen-dump output sink.
//!
//! Every run writes into a per-run temp file first; only a clean run
//! replaces the configured output path. In API mode the sink holds plain
//! screen text; in file mode the dump is wrapped in minimal HTML. The file
//! only ever grows after initialization.

use chrono::Local;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tn3270_common::{WorkflowError, WorkflowResult};
use tracing::{debug, warn};

/// Per-run output file, staged in the temp directory.
pub struct OutputSink {
    file: NamedTempFile,
    api_mode: bool,
}

impl OutputSink {
    /// Creates the staging file for one run.
    pub fn create(api_mode: bool) -> WorkflowResult<Self> {
        let file = tempfile::Builder::new()
            .prefix("workflowOutput_")
            .tempfile()
            .map_err(|e| WorkflowError::output("workflowOutput_", e.to_string()))?;
        Ok(Self { file, api_mode })
    }

    /// Path of the staging file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Writes the run preamble. In API mode the file is truncated to plain
    /// text; in file mode an HTML header with the run timestamp is
    /// appended.
    pub fn initialize(&mut self) -> WorkflowResult<()> {
        if self.api_mode {
            let file = self.file.as_file_mut();
            file.set_len(0)
                .map_err(|e| WorkflowError::output(self.file.path(), e.to_string()))?;
            return Ok(());
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let header = format!(
            "<html><head><title>ASCII Screen Capture</title></head><body>\
             <h1>ASCII Screen Capture</h1>\
             <p>Run Date and Time: {timestamp}</p>"
        );
        self.write(&header)
    }

    /// Appends one captured screen.
    pub fn append_screen(&mut self, screen: &str) -> WorkflowResult<()> {
        if self.api_mode {
            self.write(screen)
        } else {
            self.write(&format!("<pre>{screen}</pre>\n"))
        }
    }

    /// Reads back everything written so far.
    pub fn contents(&self) -> WorkflowResult<String> {
        std::fs::read_to_string(self.file.path())
            .map_err(|e| WorkflowError::output(self.file.path(), e.to_string()))
    }

    /// Moves the staged file to the configured output path, replacing any
    /// previous file. When the rename is refused (another process holds
    /// the path), falls back to `<configured>.<pid>` and reports where the
    /// file actually landed.
    pub fn persist(self, configured: &Path) -> WorkflowResult<PathBuf> {
        let _ = std::fs::remove_file(configured);
        let temp_path = self.file.into_temp_path();

        match temp_path.persist(configured) {
            Ok(()) => Ok(configured.to_path_buf()),
            Err(err) => {
                let fallback =
                    PathBuf::from(format!("{}.{}", configured.display(), std::process::id()));
                warn!(
                    configured = %configured.display(),
                    fallback = %fallback.display(),
                    error = %err.error,
                    "Output path busy, writing pid-suffixed file"
                );
                err.path
                    .persist(&fallback)
                    .map_err(|e| WorkflowError::output(&fallback, e.error.to_string()))?;
                Ok(fallback)
            }
        }
    }

    /// Detaches the staged file and returns its path. The caller owns the
    /// file from here on.
    pub fn keep(self) -> WorkflowResult<PathBuf> {
        let temp_path = self.file.into_temp_path();
        let path = temp_path.to_path_buf();
        temp_path
            .keep()
            .map_err(|e| WorkflowError::output(&path, e.to_string()))?;
        debug!(path = %path.display(), "Keeping run output file");
        Ok(path)
    }

    fn write(&mut self, content: &str) -> WorkflowResult<()> {
        self.file
            .as_file_mut()
            .write_all(content.as_bytes())
            .map_err(|e| WorkflowError::output(self.file.path(), e.to_string()))
    }
}
