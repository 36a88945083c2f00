//! Mapping between store keys and paths relative to the synchronized root
//!
//! A key under the root key *is* the relative path of its file, using `/` as
//! the separator on both sides. The root key acts purely as a prefix filter:
//! with root key `config` the key `config/app.json` lives at
//! `<root>/config/app.json`, and an empty root key selects the whole key-space.

use std::fmt;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyspaceError {
    #[error("key {key:?} is outside root key {root_key:?}")]
    OutOfScope { key: String, root_key: String },
    #[error("empty key")]
    Empty,
    #[error("key {0:?} is absolute")]
    Absolute(String),
    #[error("key {key:?} has invalid segment {segment:?}")]
    InvalidSegment { key: String, segment: String },
    #[error("path {0} is not valid UTF-8")]
    NonUtf8(PathBuf),
    #[error("path {0} is not inside the synchronized root")]
    Escapes(PathBuf),
}

/// A validated, `/`-separated path relative to the synchronized root.
///
/// Never empty, never absolute, and free of empty, `.` and `..` segments, so
/// joining it onto a root directory can not leave that directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelativePath(String);

impl RelativePath {
    pub fn parse(key: &str) -> Result<Self, KeyspaceError> {
        if key.is_empty() {
            return Err(KeyspaceError::Empty);
        }
        if key.starts_with('/') {
            return Err(KeyspaceError::Absolute(key.to_string()));
        }
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\0') {
                return Err(KeyspaceError::InvalidSegment {
                    key: key.to_string(),
                    segment: segment.to_string(),
                });
            }
        }
        Ok(Self(key.to_string()))
    }

    /// Build from a filesystem path that is already relative to the root.
    pub fn from_path(path: &Path) -> Result<Self, KeyspaceError> {
        let mut segments = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    let part = part
                        .to_str()
                        .ok_or_else(|| KeyspaceError::NonUtf8(path.to_path_buf()))?;
                    segments.push(part);
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(KeyspaceError::Escapes(path.to_path_buf()));
                }
            }
        }
        Self::parse(&segments.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Platform path for this relative path.
    pub fn to_path_buf(&self) -> PathBuf {
        self.0.split('/').collect()
    }

    /// Absolute location of this path beneath `root`.
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(self.to_path_buf())
    }

    pub fn into_key(self) -> String {
        self.0
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelativePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whether `key` falls under `root_key` using the store's prefix semantics.
pub fn in_scope(key: &str, root_key: &str) -> bool {
    key.starts_with(root_key)
}

/// Relative path for a key received from the store.
pub fn key_to_path(key: &str, root_key: &str) -> Result<RelativePath, KeyspaceError> {
    if !in_scope(key, root_key) {
        return Err(KeyspaceError::OutOfScope {
            key: key.to_string(),
            root_key: root_key.to_string(),
        });
    }
    RelativePath::parse(key)
}

/// Store key for a file, given its path relative to the synchronized root.
pub fn path_to_key(relative: &Path, root_key: &str) -> Result<String, KeyspaceError> {
    let path = RelativePath::from_path(relative)?;
    if !in_scope(path.as_str(), root_key) {
        return Err(KeyspaceError::OutOfScope {
            key: path.into_key(),
            root_key: root_key.to_string(),
        });
    }
    Ok(path.into_key())
}

/// Relative path of `absolute` beneath `root`, if it lies inside it.
pub fn relative_to(absolute: &Path, root: &Path) -> Result<RelativePath, KeyspaceError> {
    let stripped = absolute
        .strip_prefix(root)
        .map_err(|_| KeyspaceError::Escapes(absolute.to_path_buf()))?;
    RelativePath::from_path(stripped)
}
