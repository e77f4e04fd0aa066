// Process management for the daemon: PID file, lock file, liveness checks

use crate::error::{RagError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Owns the daemon's PID and lock files
#[derive(Clone)]
pub struct ProcessManager {
    pid_file: PathBuf,
    lock_file: PathBuf,
}

impl ProcessManager {
    pub fn new(pid_file: PathBuf) -> Self {
        let lock_file = pid_file.with_extension("lock");
        Self {
            pid_file,
            lock_file,
        }
    }

    /// Whether the PID file names a live process
    pub fn is_running(&self) -> bool {
        match self.read_pid() {
            // Signal 0 only checks that the process exists
            Ok(pid) => kill(Pid::from_raw(pid), None).is_ok(),
            Err(_) => false,
        }
    }

    /// Take the lock and record our PID.
    ///
    /// Lock and PID files left behind by a daemon that is no longer alive
    /// are cleared first.
    pub fn acquire(&self) -> Result<()> {
        if self.is_running() {
            let pid = self.read_pid()?;
            return Err(RagError::DaemonAlreadyRunning { pid: pid as u32 });
        }

        if self.lock_file.exists() || self.pid_file.exists() {
            tracing::warn!("Removing stale daemon files at {:?}", self.pid_file);
            self.release()?;
        }

        self.acquire_lock()?;
        self.write_pid(std::process::id())?;

        Ok(())
    }

    /// Remove PID and lock files
    pub fn release(&self) -> Result<()> {
        remove_if_exists(&self.pid_file, "PID file")?;
        remove_if_exists(&self.lock_file, "lock file")?;
        Ok(())
    }

    pub fn read_pid(&self) -> Result<i32> {
        let contents = std::fs::read_to_string(&self.pid_file).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RagError::DaemonNotRunning
            } else {
                RagError::Io {
                    source: e,
                    context: format!("Failed to read PID file: {:?}", self.pid_file),
                }
            }
        })?;

        contents
            .trim()
            .parse()
            .map_err(|_| RagError::Daemon(format!("Invalid PID in {:?}", self.pid_file)))
    }

    fn write_pid(&self, pid: u32) -> Result<()> {
        ensure_parent(&self.pid_file)?;

        std::fs::write(&self.pid_file, pid.to_string()).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to write PID file: {:?}", self.pid_file),
        })
    }

    fn acquire_lock(&self) -> Result<()> {
        ensure_parent(&self.lock_file)?;

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_file)
            .map_err(|_| {
                RagError::Daemon(
                    "Failed to acquire lock - daemon may already be running".to_string(),
                )
            })?;

        Ok(())
    }

    /// Send a signal to the daemon process
    pub fn signal(&self, sig: Signal) -> Result<()> {
        let pid = self.read_pid()?;
        kill(Pid::from_raw(pid), sig)
            .map_err(|e| RagError::Daemon(format!("Failed to send {} to process {}: {}", sig, pid, e)))
    }

    /// Poll until the daemon has exited or `timeout` passes.
    /// Returns whether it exited.
    pub fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.is_running() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        !self.is_running()
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to create directory: {:?}", parent),
        })?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path, what: &str) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RagError::Io {
            source: e,
            context: format!("Failed to remove {}: {:?}", what, path),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_file_next_to_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("daemon.pid");
        let pm = ProcessManager::new(pid_file.clone());

        assert_eq!(pm.pid_file(), pid_file);
        assert_eq!(pm.lock_file(), pid_file.with_extension("lock"));
    }

    #[test]
    fn test_not_running_initially() {
        let temp_dir = TempDir::new().unwrap();
        let pm = ProcessManager::new(temp_dir.path().join("daemon.pid"));

        assert!(!pm.is_running());
        assert!(matches!(pm.read_pid(), Err(RagError::DaemonNotRunning)));
    }

    #[test]
    fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("run").join("daemon.pid");
        let pm = ProcessManager::new(pid_file.clone());

        pm.acquire().unwrap();

        assert!(pid_file.exists());
        assert!(pm.lock_file().exists());
        assert!(pm.is_running());
        assert_eq!(pm.read_pid().unwrap(), std::process::id() as i32);

        pm.release().unwrap();

        assert!(!pid_file.exists());
        assert!(!pm.lock_file().exists());
    }

    #[test]
    fn test_cannot_acquire_twice() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("daemon.pid");
        let pm1 = ProcessManager::new(pid_file.clone());
        let pm2 = ProcessManager::new(pid_file);

        pm1.acquire().unwrap();
        assert!(matches!(
            pm2.acquire(),
            Err(RagError::DaemonAlreadyRunning { .. })
        ));

        pm1.release().unwrap();
    }

    #[test]
    fn test_stale_files_are_cleared() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("daemon.pid");
        let pm = ProcessManager::new(pid_file.clone());

        // PID far above any pid_max, so never alive
        std::fs::write(&pid_file, "2147483000").unwrap();
        std::fs::write(pm.lock_file(), "").unwrap();
        assert!(!pm.is_running());

        pm.acquire().unwrap();
        assert_eq!(pm.read_pid().unwrap(), std::process::id() as i32);
        pm.release().unwrap();
    }

    #[test]
    fn test_wait_for_exit_when_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let pm = ProcessManager::new(temp_dir.path().join("daemon.pid"));
        assert!(pm.wait_for_exit(Duration::from_millis(10)));
    }
}
