//! Filesystem side of the mirror
//!
//! Applies remote entries to disk beneath a root directory and reads local
//! files back for upload. Writes go straight over the existing file; readers
//! may observe a partially written file.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;

use crate::keyspace::{self, KeyspaceError, RelativePath};

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("{path} exists but is not a directory")]
    PathConflict { path: PathBuf },
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to stat {path}: {source}")]
    Stat { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("{path} not found")]
    NotFound { path: PathBuf },
}

impl MirrorError {
    /// True when the error only says the file is not there (any more).
    pub fn is_not_found(&self) -> bool {
        match self {
            MirrorError::NotFound { .. } => true,
            MirrorError::Read { source, .. } | MirrorError::Stat { source, .. } => {
                source.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

/// Filesystem mirror rooted at the synchronized directory.
#[derive(Debug, Clone)]
pub struct FsMirror {
    root: PathBuf,
}

impl FsMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative path of a file found beneath the root.
    pub fn relative_of(&self, absolute: &Path) -> Result<RelativePath, KeyspaceError> {
        keyspace::relative_to(absolute, &self.root)
    }

    /// Write `content` to `path`, creating missing parent directories.
    ///
    /// Returns the modification time read back from the filesystem, which is
    /// what the poller will later compare against.
    pub async fn write(
        &self,
        path: &RelativePath,
        content: &[u8],
    ) -> Result<SystemTime, MirrorError> {
        let target = path.under(&self.root);
        if let Some(parent) = target.parent() {
            ensure_dir(parent).await?;
        }
        if let Ok(meta) = fs::metadata(&target).await {
            if meta.is_dir() {
                return Err(MirrorError::PathConflict { path: target });
            }
        }

        fs::write(&target, content)
            .await
            .map_err(|source| MirrorError::Write {
                path: target.clone(),
                source,
            })?;

        self.stat_mod_time(&target).await
    }

    /// Delete the file at `path`. An absent file yields `NotFound`.
    pub async fn remove(&self, path: &RelativePath) -> Result<(), MirrorError> {
        let target = path.under(&self.root);
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(MirrorError::NotFound { path: target })
            }
            Err(source) => Err(MirrorError::Write {
                path: target,
                source,
            }),
        }
    }

    pub async fn read(&self, absolute: &Path) -> Result<Vec<u8>, MirrorError> {
        fs::read(absolute).await.map_err(|source| MirrorError::Read {
            path: absolute.to_path_buf(),
            source,
        })
    }

    pub async fn stat_mod_time(&self, absolute: &Path) -> Result<SystemTime, MirrorError> {
        let stat_err = |source| MirrorError::Stat {
            path: absolute.to_path_buf(),
            source,
        };
        let meta = fs::metadata(absolute).await.map_err(stat_err)?;
        meta.modified().map_err(stat_err)
    }
}

/// Make sure `dir` and all its ancestors exist as directories.
async fn ensure_dir(dir: &Path) -> Result<(), MirrorError> {
    match fs::create_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(source) => {
            if let Some(path) = first_non_directory(dir).await {
                return Err(MirrorError::PathConflict { path });
            }
            Err(MirrorError::Write {
                path: dir.to_path_buf(),
                source,
            })
        }
    }
}

async fn first_non_directory(dir: &Path) -> Option<PathBuf> {
    let mut ancestors: Vec<&Path> = dir.ancestors().collect();
    ancestors.reverse();
    for ancestor in ancestors {
        if ancestor.as_os_str().is_empty() {
            continue;
        }
        if let Ok(meta) = fs::metadata(ancestor).await {
            if !meta.is_dir() {
                return Some(ancestor.to_path_buf());
            }
        }
    }
    None
}
