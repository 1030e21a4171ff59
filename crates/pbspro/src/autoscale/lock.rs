use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::common::error::PbsError;

/// Process wide lock that keeps two autoscale cycles from running at the same time.
/// The lock is released when the value is dropped.
pub struct SingletonLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl SingletonLock {
    pub fn acquire(path: &Path) -> crate::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .mode(0o644)
            .open(path)
            .map_err(|error| {
                PbsError::LockError(format!("Could not open {}: {error}", path.display()))
            })?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                log::debug!("Acquired lock {}", path.display());
                Ok(SingletonLock {
                    path: path.to_path_buf(),
                    _lock: lock,
                })
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(PbsError::LockError(format!(
                "{} is locked by another process. Is the autoscaler already running?",
                path.display()
            ))),
            Err((_, errno)) => Err(PbsError::LockError(format!(
                "Could not lock {}: {errno}",
                path.display()
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
