//! Per-run output folder with a `log.txt` sink.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

/// Owns the output folder of one pipeline run.
///
/// Messages go to `log.txt` inside the folder and are mirrored to the global
/// logger; run artifacts (weight files, cached arrays) are placed next to
/// the log via [Self::artifact_path].
pub struct RunLogger {
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLogger {
    /// Creates `output_root/run_name/` and opens the log sink inside it.
    pub fn new(output_root: &Path, run_name: &str) -> Result<Self> {
        let path = output_root.join(run_name);
        fs::create_dir_all(&path)
            .with_context(|| format!("cannot create run folder {}", path.display()))?;
        let file = File::create(path.join("log.txt"))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location for a run artifact with the given file name.
    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.path.join(file_name)
    }

    /// Writes `message` to `log.txt` and mirrors it to the global logger.
    pub fn log(&self, message: &str) {
        log::info!("{message}");
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{message}");
        }
    }
}

/// Run name of the form `<prefix><unix-seconds>`.
pub fn timestamped_run_name(prefix: &str) -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{prefix}{seconds}")
}
