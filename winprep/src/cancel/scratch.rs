//! Session-owned temporary working directory.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::TempDir;

use crate::errors::{WinprepError, WinprepResult};

/// Temporary directory owned by one provisioning session.
///
/// Removed by [`ScratchDir::cleanup`] or on drop. Cleanup is idempotent and
/// may be called from the signal handler and the normal exit path.
pub struct ScratchDir {
    path: PathBuf,
    dir: Mutex<Option<TempDir>>,
}

impl ScratchDir {
    pub fn new() -> WinprepResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("winprep-")
            .tempdir()
            .map_err(|e| WinprepError::Storage(format!("Failed to create scratch dir: {}", e)))?;
        tracing::debug!(path = %dir.path().display(), "Created scratch directory");
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cleanup(&self) {
        let Some(dir) = self.dir.lock().take() else {
            return;
        };
        tracing::debug!(path = %self.path.display(), "Deleting scratch directory");
        if let Err(e) = dir.close() {
            tracing::warn!(path = %self.path.display(), "Failed to delete scratch directory: {}", e);
        }
    }
}
