//! Cross-process coordination for the shared build cache
//!
//! Two mechanisms cooperate here:
//!
//! - [`DirLock`]: an advisory exclusive file lock on `locks/<prefix>.lock`, held for the
//!   whole fetch of one build. The kernel drops it when the holder exits, so
//!   it cannot be stranded.
//! - [`Owner`]: the marker written into ledger rows (download queue, in-use).
//!   Rows outlive crashed processes, so they carry `host:pid:nonce` and a
//!   timestamp and are reclaimed once the pid is gone or the row is older than
//!   the configured threshold. A live evaluation that outlasts the threshold
//!   loses its protection; that risk is accepted and bounded by the setting.

use crate::error::{BisectError, BisectResult};
use fs4::fs_std::FileExt;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Identity of a process holding ledger rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub host: String,
    pub pid: u32,
    pub nonce: String,
}

impl Owner {
    /// Marker for the current process; the nonce distinguishes managers
    /// opened by the same process
    pub fn current() -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        Self {
            host: hostname(),
            pid: std::process::id(),
            nonce: nonce[..8].to_string(),
        }
    }

    /// Parse a marker written by [`Owner::to_string`]
    pub fn parse(marker: &str) -> Option<Self> {
        let mut parts = marker.rsplitn(3, ':');
        let nonce = parts.next()?.to_string();
        let pid = parts.next()?.parse().ok()?;
        let host = parts.next()?.to_string();
        Some(Self { host, pid, nonce })
    }

    /// Whether a row held by this owner since `since` (unix seconds) can be
    /// reclaimed at `now`
    pub fn is_stale(&self, since: i64, now: i64, stale_after_secs: u64) -> bool {
        if self.host == hostname() && !is_pid_alive(self.pid) {
            return true;
        }
        let age = now.saturating_sub(since);
        age >= 0 && age as u64 >= stale_after_secs
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.pid, self.nonce)
    }
}

/// Exclusive advisory lock on a file, released on drop
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Block until the lock is held
    pub fn acquire(path: &Path) -> BisectResult<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()
            .map_err(|e| BisectError::io(format!("locking {}", path.display()), e))?;
        debug!("Locked {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Take the lock only if nobody else holds it
    pub fn try_acquire(path: &Path) -> BisectResult<Option<Self>> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(BisectError::io(format!("locking {}", path.display()), e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Unlocking {} failed: {}", self.path.display(), e);
        }
        debug!("Unlocked {}", self.path.display());
    }
}

fn open_lock_file(path: &Path) -> BisectResult<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BisectError::io(format!("creating {}", parent.display()), e))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| BisectError::io(format!("opening lock {}", path.display()), e))
}

/// Check whether a pid is alive with `kill(pid, 0)`
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    #[cfg(unix)]
    {
        // SAFETY: signal 0 only checks for existence.
        #[allow(unsafe_code)]
        let result = unsafe { libc::kill(pid, 0) };
        if result == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else
        io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn owner_roundtrip() {
        let owner = Owner::current();
        let parsed = Owner::parse(&owner.to_string()).unwrap();
        assert_eq!(parsed, owner);
        assert_eq!(parsed.pid, std::process::id());
    }

    #[test]
    fn owner_parse_rejects_garbage() {
        assert!(Owner::parse("nonsense").is_none());
        assert!(Owner::parse("host:notapid:abc").is_none());
    }

    #[test]
    fn live_owner_goes_stale_by_age() {
        let owner = Owner::current();
        assert!(!owner.is_stale(1_000, 1_010, 60));
        assert!(owner.is_stale(1_000, 1_060, 60));
    }

    #[test]
    fn dead_owner_is_stale_immediately() {
        let owner = Owner {
            host: hostname(),
            pid: u32::MAX - 1,
            nonce: "deadbeef".to_string(),
        };
        assert!(owner.is_stale(1_000, 1_000, 3_600));
    }

    #[test]
    fn current_pid_alive() {
        assert!(is_pid_alive(std::process::id()));
        assert!(!is_pid_alive(0));
    }

    #[test]
    fn lock_excludes_second_holder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locks").join("central-2023-01-01-opt.lock");

        let held = DirLock::acquire(&path).unwrap();
        assert!(DirLock::try_acquire(&path).unwrap().is_none());

        drop(held);
        assert!(DirLock::try_acquire(&path).unwrap().is_some());
    }
}
