//! Working-directory scoping.
//!
//! [`DirGuard`] changes the process working directory and restores the
//! previous one when dropped. [`in_dir`] wraps a closure in such a guard.
//! Commands built without an explicit cwd resolve the current directory
//! at build time, so they pick up an active scope.
//!
//! The working directory is process-wide state; scopes on different
//! threads interfere with each other.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ShcmdError;
use crate::Result;

/// Restores the previous working directory on drop.
#[derive(Debug)]
#[must_use = "the previous directory is restored as soon as the guard is dropped"]
pub struct DirGuard {
    previous: PathBuf,
}

impl DirGuard {
    /// Change into `path` until the guard is dropped.
    pub fn enter(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(path).map_err(|e| {
            ShcmdError::InvalidArgument(format!("cannot enter {}: {}", path.display(), e))
        })?;
        debug!(from = %previous.display(), to = %path.display(), "entered directory");
        Ok(Self { previous })
    }

    /// The directory that will be restored.
    pub fn previous(&self) -> &Path {
        &self.previous
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.previous) {
            warn!(dir = %self.previous.display(), error = %e, "failed to restore directory");
        }
    }
}

/// Run `f` with the working directory set to `path`.
pub fn in_dir<T>(path: impl AsRef<Path>, f: impl FnOnce() -> T) -> Result<T> {
    let _guard = DirGuard::enter(path)?;
    Ok(f())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::CommandSpec;

    // Both cases live in one test: the working directory is shared by
    // every test thread.
    #[test]
    fn test_scope_restores_directory() {
        let original = std::env::current_dir().unwrap();
        let target = std::env::temp_dir().canonicalize().unwrap();

        let (inside, spec) = in_dir(&target, || {
            let spec = CommandSpec::new("pwd").unwrap();
            (std::env::current_dir().unwrap(), spec)
        })
        .unwrap();
        assert_eq!(inside.canonicalize().unwrap(), target);
        assert_eq!(spec.cwd(), target);
        assert_eq!(std::env::current_dir().unwrap(), original);

        let result = std::panic::catch_unwind(|| {
            let _guard = DirGuard::enter(&target).unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(std::env::current_dir().unwrap(), original);

        let err = DirGuard::enter("/nonexistent-shcmd-dir").unwrap_err();
        assert!(matches!(err, ShcmdError::InvalidArgument(_)));
        assert_eq!(std::env::current_dir().unwrap(), original);
    }
}
