//! File locking for mutual exclusion between ingestion runs.
//!
//! Uses flock() for advisory locking on the dataset directory, so a CLI
//! `sync` and a webhook handled by the daemon never merge at the same time.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Lock file name placed next to the dataset
const LOCK_FILE_NAME: &str = "kwmatch.lock";

/// A held file lock that releases on drop
pub struct FileLock {
    #[allow(dead_code)]
    file: File,
}

impl FileLock {
    /// Attempt to acquire an exclusive lock without waiting.
    pub fn try_acquire(dir: &Path) -> io::Result<Self> {
        let file = Self::open(dir)?;
        Self::try_lock_exclusive(&file)?;
        Ok(FileLock { file })
    }

    /// Acquire an exclusive lock, blocking until available.
    pub fn acquire_blocking(dir: &Path) -> io::Result<Self> {
        let file = Self::open(dir)?;
        Self::lock_exclusive(&file)?;
        Ok(FileLock { file })
    }

    fn open(dir: &Path) -> io::Result<File> {
        std::fs::create_dir_all(dir)?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE_NAME))
    }

    #[cfg(unix)]
    fn try_lock_exclusive(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock
                || err.raw_os_error() == Some(libc::EWOULDBLOCK)
                || err.raw_os_error() == Some(libc::EAGAIN)
            {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "Dataset is locked by another ingestion run",
                ));
            }
            return Err(err);
        }
        Ok(())
    }

    #[cfg(unix)]
    fn lock_exclusive(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    // No advisory locking off unix; the in-process mutex still serializes.
    #[cfg(not(unix))]
    fn try_lock_exclusive(_file: &File) -> io::Result<()> {
        Ok(())
    }

    #[cfg(not(unix))]
    fn lock_exclusive(_file: &File) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for FileLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        unsafe { libc::flock(fd, libc::LOCK_UN) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();

        let lock1 = FileLock::try_acquire(dir.path());
        assert!(lock1.is_ok(), "First lock should succeed");

        let lock2 = FileLock::try_acquire(dir.path());
        assert!(lock2.is_err(), "Second lock should fail");

        drop(lock1);

        let lock3 = FileLock::try_acquire(dir.path());
        assert!(lock3.is_ok(), "Third lock should succeed after release");
    }

    #[test]
    fn test_blocking_acquire_after_release() {
        let dir = tempfile::tempdir().unwrap();

        let lock = FileLock::acquire_blocking(dir.path()).unwrap();
        drop(lock);
        assert!(FileLock::acquire_blocking(dir.path()).is_ok());
    }
}
