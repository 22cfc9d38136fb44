//! Named asset lookup for the remote-execution bootstrap.

use std::path::{Path, PathBuf};

use crate::errors::{WinprepError, WinprepResult};

/// Byte-addressable lookup of an asset by exact name.
pub trait AssetSource: Send + Sync {
    fn asset(&self, name: &str) -> WinprepResult<Vec<u8>>;
}

/// Serves assets from files in a directory.
///
/// Names are matched exactly against file names directly inside the
/// directory; subpaths are rejected.
#[derive(Debug, Clone)]
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetSource for DirAssetSource {
    fn asset(&self, name: &str) -> WinprepResult<Vec<u8>> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(WinprepError::AssetNotFound(name.to_string()));
        }

        let path = self.root.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(WinprepError::AssetNotFound(name.to_string()))
            }
            Err(e) => Err(WinprepError::Storage(format!(
                "Failed to read asset {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
