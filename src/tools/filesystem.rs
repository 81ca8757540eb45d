// src/tools/filesystem.rs

//! Filesystem-only tools and the scoped cleanup guard for speculative
//! artifacts.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace, warn};

use crate::errors::{BuildError, Result};

use super::{BoxFuture, Tool, ToolOutput};

/// Deletes a list of files or directories. Missing paths are not an error.
#[derive(Debug)]
pub struct RemovePathsTool {
    name: String,
    paths: Vec<PathBuf>,
    interrupted: AtomicBool,
}

impl RemovePathsTool {
    pub fn new(name: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            paths,
            interrupted: AtomicBool::new(false),
        }
    }
}

impl Tool for RemovePathsTool {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn run(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for path in &self.paths {
                if self.interrupted.load(Ordering::SeqCst) {
                    return Err(BuildError::Interrupted);
                }
                debug!(tool = %self.name, "deleting {}", path.display());
                remove_path(path).await.map_err(|e| {
                    BuildError::Other(anyhow::anyhow!(
                        "failed to delete {}: {e}",
                        path.display()
                    ))
                })?;
            }
            Ok(())
        })
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn result(&self) -> ToolOutput {
        ToolOutput::Nothing
    }
}

async fn remove_path(path: &Path) -> io::Result<()> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            trace!("{} does not exist", path.display());
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

/// Deletes a speculatively created artifact when dropped, unless it was
/// committed on the success path.
///
/// A path that already existed when the guard was created is left alone, so
/// a completed artifact from an earlier run is never removed by mistake.
#[derive(Debug)]
pub struct ArtifactGuard {
    path: PathBuf,
    armed: bool,
}

impl ArtifactGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let armed = std::fs::symlink_metadata(&path).is_err();
        Self { path, armed }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the artifact and hand back its path.
    pub fn commit(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let result = match std::fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&self.path),
            Ok(_) => std::fs::remove_file(&self.path),
            Err(_) => return,
        };
        match result {
            Ok(()) => debug!("removed partial artifact {}", self.path.display()),
            Err(e) => warn!(error = %e, "failed to remove partial artifact {}", self.path.display()),
        }
    }
}
