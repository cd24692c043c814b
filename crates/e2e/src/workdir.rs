//! Scenario working directories

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::E2eResult;

/// A directory that starts out empty and is removed when the scenario ends.
///
/// `remove` is the normal release path; dropping an unreleased guard removes
/// the directory synchronously as a fallback.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    released: bool,
}

impl ScratchDir {
    /// Remove whatever a previous run left at `path`, then create it empty
    pub async fn fresh(path: impl AsRef<Path>) -> E2eResult<Self> {
        let path = path.as_ref().to_path_buf();

        // Symlinks are removed, never followed
        match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                info!("Removing leftover directory {}", path.display());
                tokio::fs::remove_dir_all(&path).await?;
            }
            Ok(_) => {
                info!("Removing leftover file {}", path.display());
                tokio::fs::remove_file(&path).await?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&path).await?;
        debug!("Created scratch directory {}", path.display());

        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory and everything in it
    pub async fn remove(mut self) -> E2eResult<()> {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}
