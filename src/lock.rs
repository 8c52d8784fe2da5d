//! Build lock for a data directory.
//!
//! `build.lock` is flock()ed for the whole build and records the holding
//! process, so a rejected build can report who it collided with. Searchers
//! only read the artifacts and never take the lock.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

const LOCK_FILE_NAME: &str = "build.lock";

/// Exclusive right to rewrite the artifacts in one data directory.
/// Released (and the holder record cleared) on drop.
pub struct BuildLock {
    file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Take the lock on `data_dir` without waiting.
    ///
    /// Fails with `ErrorKind::WouldBlock` while another build holds it; the
    /// error message names the holder when it is known.
    pub fn try_acquire(data_dir: &Path) -> io::Result<Self> {
        let path = data_dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !try_flock(&file)? {
            let message = match read_holder(&mut file) {
                Some(holder) => format!(
                    "an index build is already running in {} ({holder})",
                    data_dir.display()
                ),
                None => format!("an index build is already running in {}", data_dir.display()),
            };
            return Err(io::Error::new(io::ErrorKind::WouldBlock, message));
        }

        file.set_len(0)?;
        writeln!(
            file,
            "pid {} since {}",
            std::process::id(),
            Utc::now().to_rfc3339()
        )?;

        log::debug!("Acquired build lock {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        // closing the file releases the flock
        let _ = self.file.set_len(0);
        log::debug!("Released build lock {}", self.path.display());
    }
}

fn read_holder(file: &mut File) -> Option<String> {
    let mut holder = String::new();
    file.read_to_string(&mut holder).ok()?;
    let holder = holder.trim();
    (!holder.is_empty()).then(|| holder.to_string())
}

/// `Ok(false)` when another open file description holds the lock.
#[cfg(unix)]
fn try_flock(file: &File) -> io::Result<bool> {
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN => Ok(false),
        _ => Err(err),
    }
}

#[cfg(not(unix))]
fn try_flock(_file: &File) -> io::Result<bool> {
    Ok(true)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn lock_contents(dir: &Path) -> String {
        std::fs::read_to_string(dir.join(LOCK_FILE_NAME)).unwrap()
    }

    #[test]
    fn test_holder_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = BuildLock::try_acquire(dir.path()).unwrap();

        let contents = lock_contents(dir.path());
        assert!(contents.starts_with(&format!("pid {} since ", std::process::id())));
    }

    #[test]
    fn test_second_build_is_rejected_with_holder() {
        let dir = tempfile::tempdir().unwrap();
        let _held = BuildLock::try_acquire(dir.path()).unwrap();

        let err = BuildLock::try_acquire(dir.path()).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(err.to_string().contains(&format!("pid {}", std::process::id())));

        // the rejected attempt must not clobber the holder record
        assert!(!lock_contents(dir.path()).is_empty());
    }

    #[test]
    fn test_release_on_drop() {
        let dir = tempfile::tempdir().unwrap();

        let lock = BuildLock::try_acquire(dir.path()).unwrap();
        drop(lock);
        assert_eq!(lock_contents(dir.path()), "");

        assert!(BuildLock::try_acquire(dir.path()).is_ok());
    }
}
