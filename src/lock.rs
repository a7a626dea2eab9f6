use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Exclusive claim on a database for the length of one run.
///
/// The lock is a file beside the database created with `create_new`, so two runs can
/// never both hold it. It is removed when the guard drops, and taken over by the next
/// run if the process named inside it has exited without dropping it.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn path_for(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Claim the lock for `db_path`. A lock left behind by a process that no longer
    /// exists is taken over.
    pub fn acquire(db_path: &Path) -> Result<Self> {
        let path = Self::path_for(db_path);
        match Self::create(&path) {
            Err(Error::AlreadyRunning { .. }) if Self::is_stale(&path) => {
                warn!(lock = %path.display(), "Taking over a lock left by a process that has exited");
                fs::remove_file(&path)?;
                Self::create(&path)
            }
            other => other,
        }
    }

    fn create(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyRunning {
                    lock: path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        debug!(lock = %path.display(), "Acquired run lock");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// The lock names a pid that is no longer running. An unreadable or empty lock
    /// may belong to a run that has not written its pid yet, so it is kept.
    fn is_stale(path: &Path) -> bool {
        fs::read_to_string(path)
            .ok()
            .and_then(|text| text.trim().parse::<u32>().ok())
            .is_some_and(|pid| !process_alive(pid))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks that the process exists
    // SAFETY: kill with signal 0 sends nothing and has no memory effects
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), "Failed to remove run lock: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("TradeDangerous.db");

        let lock = RunLock::acquire(&db).unwrap();
        assert_eq!(lock.path(), dir.path().join("TradeDangerous.db.lock"));
        assert!(matches!(RunLock::acquire(&db), Err(Error::AlreadyRunning { .. })));

        drop(lock);
        assert!(RunLock::acquire(&db).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_of_exited_process_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("TradeDangerous.db");
        // Above any pid_max, so never a live process
        fs::write(RunLock::path_for(&db), format!("{}\n", i32::MAX)).unwrap();

        let lock = RunLock::acquire(&db).unwrap();
        let owner = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_lock_without_pid_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("TradeDangerous.db");
        fs::write(RunLock::path_for(&db), "").unwrap();

        assert!(matches!(RunLock::acquire(&db), Err(Error::AlreadyRunning { .. })));
    }
}
