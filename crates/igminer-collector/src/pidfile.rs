use std::fs;
use std::path::{Path, PathBuf};

use crate::CollectError;

pub const DEFAULT_PID_FILE: &str = "igminer_daemon.pid";

/// Holds the daemon's pid file for as long as it lives.
///
/// A file left behind by a dead process is treated as stale and replaced.
/// Liveness is checked through `/proc`, so on systems without it every
/// existing file counts as stale.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// # Errors
    ///
    /// Returns [`CollectError::PidFile`] when another live daemon holds the
    /// file or it cannot be written.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, CollectError> {
        let path = path.into();
        let fail = |reason: String| CollectError::PidFile {
            path: path.display().to_string(),
            reason,
        };

        if let Ok(existing) = fs::read_to_string(&path) {
            if let Ok(pid) = existing.trim().parse::<u32>() {
                if pid != std::process::id() && process_alive(pid) {
                    return Err(fail(format!("daemon already running with pid {pid}")));
                }
            }
            tracing::warn!(path = %path.display(), "replacing stale pid file");
        }

        fs::write(&path, format!("{}\n", std::process::id())).map_err(|e| fail(e.to_string()))?;
        tracing::debug!(path = %path.display(), pid = std::process::id(), "pid file written");
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "could not remove pid file");
        }
    }
}

fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}
