//! On-disk progress checkpoints. Writes go to a sibling temp file that is
//! fsynced and renamed over the target, so a crash leaves either the old or
//! the new checkpoint, never a torn one.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use igminer_core::ProgressCheckpoint;

use crate::CollectError;

pub const DEFAULT_CHECKPOINT_FILE: &str = "igminer_checkpoint.json";

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CollectError {
        CollectError::CheckpointIo {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// `Ok(None)` when no checkpoint exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`CollectError::CheckpointIo`] if the file exists but cannot
    /// be read, or [`CollectError::CheckpointParse`] if it is not a valid
    /// checkpoint.
    pub fn load(&self) -> Result<Option<ProgressCheckpoint>, CollectError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| CollectError::CheckpointParse {
                path: self.path.display().to_string(),
                source,
            })
    }

    /// # Errors
    ///
    /// Returns [`CollectError::CheckpointIo`] if the temp file cannot be
    /// written or renamed into place.
    pub fn save(&self, checkpoint: &ProgressCheckpoint) -> Result<(), CollectError> {
        let body = serde_json::to_vec_pretty(checkpoint).map_err(|source| {
            CollectError::CheckpointParse {
                path: self.path.display().to_string(),
                source,
            }
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp).map_err(|e| self.io_error(e))?;
        file.write_all(&body).map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        tracing::debug!(
            path = %self.path.display(),
            pending = checkpoint.targets.len(),
            total_collected = checkpoint.total_collected,
            "checkpoint saved"
        );
        Ok(())
    }
}
