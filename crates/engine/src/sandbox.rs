//! Configuration-root containment
//!
//! Every certificate and key path the engine touches must resolve under the
//! reverse proxy's configuration root. Resolution is purely lexical so a
//! violation is detected before any filesystem access.

use std::path::{Component, Path, PathBuf};

use crate::error::SandboxError;

/// The reverse proxy's configuration root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfRoot {
    root: PathBuf,
}

impl ConfRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: normalize(&root.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Directory holding certificate directories
    pub fn ssl_dir(&self) -> PathBuf {
        self.root.join("ssl")
    }

    /// Resolve `path` (relative paths are taken from the root) and reject it
    /// if the result lies outside the root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, SandboxError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(SandboxError::EmptyPath);
        }

        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = normalize(&joined);

        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(SandboxError::Escape {
                path: path.to_path_buf(),
                root: self.root.clone(),
            })
        }
    }
}

/// Lexically collapse `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` never climbs above the filesystem root
                if !matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                ) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
