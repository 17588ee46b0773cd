use std::path::{Path, PathBuf};
use thiserror::Error;

/// Keeps patch targets inside a cloned repository.
///
/// A freshly cloned tree is untrusted: a symlink at the patch target could
/// point anywhere on the host, and the patch would then overwrite that file.
#[derive(Debug, Clone)]
pub struct CloneGuard {
    /// Canonical path to the clone root
    clone_root: PathBuf,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Path escapes clone directory: {path} (clone: {clone_root})")]
    OutsideClone { path: PathBuf, clone_root: PathBuf },

    #[error("Failed to canonicalize path: {0}")]
    Canonicalize(#[from] std::io::Error),
}

impl CloneGuard {
    /// Create a guard rooted at an existing clone directory.
    pub fn new(clone_root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let clone_root = clone_root.as_ref().canonicalize()?;
        Ok(Self { clone_root })
    }

    /// Check that a path resolves inside the clone.
    ///
    /// Relative paths are resolved against the clone root. Returns the
    /// canonical path on success.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let path = path.as_ref();

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.clone_root.join(path)
        };

        // Resolves symlinks and .. components
        let canonical = absolute.canonicalize()?;

        if !canonical.starts_with(&self.clone_root) {
            return Err(SafetyError::OutsideClone {
                path: canonical,
                clone_root: self.clone_root.clone(),
            });
        }

        Ok(canonical)
    }

    pub fn clone_root(&self) -> &Path {
        &self.clone_root
    }
}
