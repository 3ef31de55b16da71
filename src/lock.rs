//! Exclusive advisory file locks.
//!
//! A [`LockedFile`] holds `flock(LOCK_EX)` on its file from construction until
//! drop. Contention is waited out with exponential backoff.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::LockPolicy;
use crate::{Error, Result};

pub(crate) fn try_lock(file: &File) -> Result<bool> {
    let res = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if res == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        return Ok(false);
    }
    Err(Error::Io(err))
}

fn unlock(file: &File) {
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

/// A file opened for append under an exclusive lock.
#[derive(Debug)]
pub struct LockedFile {
    file: File,
    path: PathBuf,
}

impl LockedFile {
    /// Opens (creating if needed) `path` for reading and appending, then
    /// blocks until the lock is held or `policy.timeout` elapses.
    pub fn open_append(path: &Path, policy: &LockPolicy) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let started = Instant::now();
        let mut backoff = policy.initial_backoff.max(Duration::from_micros(1));
        let mut contended = false;
        loop {
            if try_lock(&file)? {
                if contended {
                    log::debug!(
                        "acquired lock on {} after {:?}",
                        path.display(),
                        started.elapsed()
                    );
                }
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }
            if !contended {
                log::debug!("waiting for lock on {}", path.display());
                contended = true;
            }
            if let Some(timeout) = policy.timeout {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    return Err(Error::LockTimeout {
                        path: path.to_path_buf(),
                        timeout,
                    });
                }
                backoff = backoff.min(timeout - elapsed);
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(policy.max_backoff.max(policy.initial_backoff));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Last byte of the file, if any.
    pub fn last_byte(&self) -> Result<Option<u8>> {
        use std::os::unix::fs::FileExt;
        let len = self.len()?;
        if len == 0 {
            return Ok(None);
        }
        let mut buf = [0u8; 1];
        self.file.read_exact_at(&mut buf, len - 1)?;
        Ok(Some(buf[0]))
    }

    pub fn sync_data(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

impl Write for LockedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}
