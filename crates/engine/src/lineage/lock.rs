//! Per-lineage cross-process lock

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use certward_common::LineageName;

use crate::errors::StorageError;

/// Exclusive `flock` on `renewal/<name>.lock`, released on drop
#[derive(Debug)]
pub struct LineageLock {
    name: LineageName,
    path: PathBuf,
    _lock: Flock<File>,
}

impl LineageLock {
    pub(crate) fn acquire(dir: &Path, name: &LineageName) -> Result<Self, StorageError> {
        let path = dir.join(format!("{}.lock", name));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!(lineage = %name, path = %path.display(), "Acquired lineage lock");
                Ok(Self {
                    name: name.clone(),
                    path,
                    _lock: lock,
                })
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                Err(StorageError::Locked(name.clone()))
            }
            Err((_, errno)) => Err(StorageError::Io(io::Error::from(errno))),
        }
    }

    pub fn name(&self) -> &LineageName {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LineageLock {
    fn drop(&mut self) {
        debug!(lineage = %self.name, "Released lineage lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_lock_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let name = LineageName::new("a.com");

        let held = LineageLock::acquire(dir.path(), &name).unwrap();
        let err = LineageLock::acquire(dir.path(), &name).unwrap_err();
        assert!(matches!(err, StorageError::Locked(ref n) if n == &name));

        drop(held);
        assert!(LineageLock::acquire(dir.path(), &name).is_ok());
    }

    #[test]
    fn test_locks_are_per_lineage() {
        let dir = tempfile::tempdir().unwrap();
        let _a = LineageLock::acquire(dir.path(), &LineageName::new("a.com")).unwrap();
        let b = LineageLock::acquire(dir.path(), &LineageName::new("b.com")).unwrap();
        assert!(b.path().ends_with("b.com.lock"));
    }
}
