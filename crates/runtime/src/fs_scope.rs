//! Scoped resource acquisition (§4.11, §5): an RAII guard over the
//! process's current working directory. Function calls that operate on a
//! checked-out repository (the review engine's diff preparation, function
//! classes that shell out into a workspace) enter the scope, do their
//! work, and the previous `cwd` is restored on every exit path — including
//! an early return via `?` or a panic unwinding through the guard's `Drop`.

use crate::error::RuntimeError;
use std::path::{Path, PathBuf};

/// While alive, the process's working directory is `path`. Dropping it
/// restores whatever the working directory was before `enter` was called.
pub struct WorkingDirScope {
    previous: PathBuf,
}

impl WorkingDirScope {
    /// Switches into `path`, remembering the previous working directory so
    /// `Drop` can restore it. Fails if either `cwd` can't be read or `path`
    /// can't be entered, leaving the process's working directory untouched.
    pub fn enter(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let previous = std::env::current_dir().map_err(|source| RuntimeError::WorkingDirScope {
            path: path.display().to_string(),
            source,
        })?;
        std::env::set_current_dir(path).map_err(|source| RuntimeError::WorkingDirScope {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { previous })
    }
}

impl Drop for WorkingDirScope {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.previous) {
            log::error!(
                "failed to restore working directory to {}: {e}",
                self.previous.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `std::env::set_current_dir` is process-global, so these tests run
    // serially within this module to avoid racing each other's assertions
    // about the restored directory.
    static GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn restores_the_previous_directory_on_drop() {
        let _serial = GUARD.lock().unwrap();
        let before = std::env::current_dir().unwrap();
        let tmp = std::env::temp_dir();
        {
            let scope = WorkingDirScope::enter(&tmp).unwrap();
            assert_eq!(std::env::current_dir().unwrap(), tmp.canonicalize().unwrap_or(tmp.clone()));
            drop(scope);
        }
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn restores_the_previous_directory_when_the_scope_unwinds_on_panic() {
        let _serial = GUARD.lock().unwrap();
        let before = std::env::current_dir().unwrap();
        let tmp = std::env::temp_dir();
        let result = std::panic::catch_unwind(|| {
            let _scope = WorkingDirScope::enter(&tmp).unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(std::env::current_dir().unwrap(), before);
    }
}
