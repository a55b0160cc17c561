use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::TrayError;

const LOCK_NAME: &str = "twingate_tray.lock";

pub fn default_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(LOCK_NAME)
}

/// A pid file. Held from a successful [`acquire`](LockFile::acquire) until
/// [`release`](LockFile::release) or drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    held: bool,
}

impl LockFile {
    pub fn new() -> Self {
        Self::at(default_path())
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        LockFile {
            path: path.into(),
            held: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Fails with [`TrayError::AlreadyRunning`] if the pid in an existing lock
    /// belongs to a live process. Stale locks are replaced.
    pub fn acquire(&mut self) -> Result<(), TrayError> {
        if let Ok(data) = fs::read_to_string(&self.path) {
            match data.trim().parse::<u32>() {
                Ok(pid) if process_alive(pid) => return Err(TrayError::AlreadyRunning(pid)),
                _ => {
                    debug!(path = %self.path.display(), "removing stale lock file");
                    fs::remove_file(&self.path)?;
                }
            }
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let pid = std::process::id();
        fs::write(&self.path, format!("{pid}\n"))?;
        self.held = true;
        info!(pid, "lock acquired");
        Ok(())
    }

    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        if fs::remove_file(&self.path).is_ok() {
            info!("lock released");
        }
    }
}

impl Default for LockFile {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.release();
    }
}

fn process_alive(pid: u32) -> bool {
    pid != 0 && Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_NAME);
        let mut lock = LockFile::at(&path);
        lock.acquire().unwrap();
        assert!(lock.is_held());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{}\n", std::process::id())
        );
        lock.release();
        assert!(!path.exists());
        lock.release();
    }

    #[test]
    fn test_live_lock_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_NAME);
        let mut first = LockFile::at(&path);
        first.acquire().unwrap();

        let mut second = LockFile::at(&path);
        let pid = std::process::id();
        assert!(matches!(second.acquire(), Err(TrayError::AlreadyRunning(p)) if p == pid));
        drop(second);
        // the refused lock must not remove the holder's file
        assert!(path.exists());
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_NAME);
        fs::write(&path, format!("{}\n", u32::MAX)).unwrap();
        let mut lock = LockFile::at(&path);
        lock.acquire().unwrap();
        assert!(lock.is_held());

        fs::write(&path, "garbage").unwrap();
        let mut other = LockFile::at(&path);
        other.acquire().unwrap();
    }

    #[test]
    fn test_drop_removes_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_NAME);
        {
            let mut lock = LockFile::at(&path);
            lock.acquire().unwrap();
        }
        assert!(!path.exists());
    }
}
