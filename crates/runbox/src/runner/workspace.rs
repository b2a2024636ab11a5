//! Per-request workspaces
//!
//! Each run gets a fresh, uniquely named directory under the configured
//! root. The directory is removed when the workspace is closed or dropped.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Prefix of workspace directory names
pub const WORKSPACE_PREFIX: &str = "run-";

// Restricted identities need to traverse the directory and read the source
const DIR_MODE: u32 = 0o755;
const SOURCE_MODE: u32 = 0o644;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace under {root}: {source}")]
    Create {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path traversal not allowed: {0}")]
    InvalidPath(String),

    #[error("workspace I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Temporary directory owned by a single run
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a new workspace under `root`, creating `root` if needed
    #[instrument]
    pub async fn create(root: &Path) -> Result<Self, WorkspaceError> {
        let create_err = |source| WorkspaceError::Create {
            root: root.to_path_buf(),
            source,
        };

        tokio::fs::create_dir_all(root).await.map_err(create_err)?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(root)
            .map_err(create_err)?;
        tokio::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(DIR_MODE))
            .await
            .map_err(create_err)?;

        debug!(path = %dir.path().display(), "workspace created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Host path of a file inside the workspace
    ///
    /// Returns an error if the path contains path traversal attempts.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        if name.is_empty() || name.contains("..") || name.starts_with('/') {
            return Err(WorkspaceError::InvalidPath(name.to_string()));
        }
        Ok(self.dir.path().join(name))
    }

    /// Write source text verbatim and return its path
    #[instrument(skip(self, content))]
    pub async fn write_source(&self, name: &str, content: &[u8]) -> Result<PathBuf, WorkspaceError> {
        let path = self.file_path(name)?;
        tokio::fs::write(&path, content).await?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(SOURCE_MODE)).await?;
        debug!(path = %path.display(), len = content.len(), "wrote source");
        Ok(path)
    }

    /// Remove the workspace, reporting failures
    ///
    /// Dropping the workspace also removes it, but silently.
    #[instrument(skip(self), fields(path = %self.dir.path().display()))]
    pub fn close(self) -> Result<(), WorkspaceError> {
        match self.dir.close() {
            Ok(()) => {
                debug!("workspace removed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to remove workspace");
                Err(e.into())
            }
        }
    }
}
