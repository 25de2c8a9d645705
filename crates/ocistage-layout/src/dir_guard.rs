use std::env;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::{Result, StageError};

/// Enters a directory for the lifetime of the guard and restores the
/// previous working directory on drop, including on early return and unwind.
///
/// The working directory is process-wide: guards must not be held from more
/// than one thread at a time. Nested guards restore in reverse order, each to
/// the directory it observed on entry.
#[derive(Debug)]
#[must_use = "the previous directory is restored as soon as the guard is dropped"]
pub struct ScopedDir {
    saved: PathBuf,
}

impl ScopedDir {
    pub fn enter(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let saved = env::current_dir().map_err(|source| StageError::DirectoryAccess {
            path: PathBuf::from("."),
            source,
        })?;

        if let Err(source) = env::set_current_dir(path) {
            if let Err(err) = env::set_current_dir(&saved) {
                warn!(dir = %saved.display(), error = %err, "failed restoring working directory");
            }
            return Err(StageError::DirectoryAccess {
                path: path.to_path_buf(),
                source,
            });
        }

        Ok(Self { saved })
    }

    /// Runs `f` inside `path`, restoring the previous directory afterwards.
    pub fn within<T>(path: impl AsRef<Path>, f: impl FnOnce() -> T) -> Result<T> {
        let _guard = Self::enter(path)?;
        Ok(f())
    }

    pub fn saved(&self) -> &Path {
        &self.saved
    }
}

impl Drop for ScopedDir {
    fn drop(&mut self) {
        if let Err(err) = env::set_current_dir(&self.saved) {
            warn!(dir = %self.saved.display(), error = %err, "failed restoring working directory");
        }
    }
}
