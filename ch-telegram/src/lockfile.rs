//! Sentinel-file locks shared by every process using one state directory.
//!
//! A lock is an exclusive-create file carrying the holder's PID. Staleness is
//! decided by probing that PID (unix) or, when the PID cannot be read, by the
//! file's age. Guards remove the file on drop so every exit path releases.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use ch_core::{RelayError, Result};

const LOCK_ACQUIRE_WAIT: Duration = Duration::from_secs(3);
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);
const LOCK_STALE_AGE: Duration = Duration::from_secs(10);

/// Held lock; dropping it deletes the sentinel file.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Blocking acquire: retries every 20 ms for up to 3 s, stealing locks whose
/// owner is gone or whose file has not been touched for 10 s.
pub async fn acquire(path: &Path, label: &str) -> Result<LockGuard> {
    ensure_parent(path)?;
    let deadline = tokio::time::Instant::now() + LOCK_ACQUIRE_WAIT;
    loop {
        if try_create(path)? {
            return Ok(LockGuard {
                path: path.to_path_buf(),
            });
        }
        if is_stale(path, LOCK_STALE_AGE) {
            tracing::debug!(path = %path.display(), "removing stale {label} lock");
            let _ = fs::remove_file(path);
            continue;
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RelayError::Store(format!(
                "timeout waiting for {label} lock"
            )));
        }
        tokio::time::sleep(LOCK_RETRY_DELAY).await;
    }
}

/// Non-blocking acquire used for poller election: steals stale locks, but a
/// live holder means `None` immediately.
pub fn try_acquire(path: &Path, stale_age: Duration) -> Result<Option<LockGuard>> {
    ensure_parent(path)?;
    loop {
        if try_create(path)? {
            return Ok(Some(LockGuard {
                path: path.to_path_buf(),
            }));
        }
        if is_stale(path, stale_age) {
            tracing::debug!(path = %path.display(), "removing stale poller lock");
            let _ = fs::remove_file(path);
            continue;
        }
        return Ok(None);
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(RelayError::store)?;
    }
    Ok(())
}

fn try_create(path: &Path) -> Result<bool> {
    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(mut file) => {
            let _ = writeln!(file, "{}", std::process::id());
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(RelayError::store(err)),
    }
}

fn is_stale(path: &Path, max_age: Duration) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if cfg!(unix) {
        if let Ok(raw) = fs::read_to_string(path) {
            if let Ok(pid) = raw.trim().parse::<i32>() {
                if pid > 0 {
                    return !process_alive(pid);
                }
            }
        }
    }
    // Unreadable PID: fall back to the lock file's age.
    match meta.modified() {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .map(|age| age > max_age)
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// `kill(pid, 0)` existence probe. EPERM means the process exists but belongs
/// to another user, so it still counts as alive.
#[cfg(unix)]
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// No cheap liveness probe off unix; callers must rely on TTLs instead.
#[cfg(not(unix))]
pub fn process_alive(_pid: i32) -> bool {
    true
}

#[cfg(unix)]
pub fn local_hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return String::new();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).trim().to_lowercase()
}

#[cfg(not(unix))]
pub fn local_hostname() -> String {
    std::env::var("COMPUTERNAME")
        .map(|h| h.trim().to_lowercase())
        .unwrap_or_default()
}

/// `telegram-pending.json` + `.lock` -> `telegram-pending.json.lock`.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::{acquire, is_stale, process_alive, sibling, try_acquire, LOCK_STALE_AGE};
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn current_process_is_alive_and_bogus_pid_is_not() {
        assert!(process_alive(std::process::id() as i32));
        assert!(!process_alive(999_999_999));
        assert!(!process_alive(0));
    }

    #[test]
    fn sibling_appends_to_the_full_file_name() {
        let path = Path::new("/tmp/state/telegram-pending.json");
        assert_eq!(
            sibling(path, ".lock"),
            Path::new("/tmp/state/telegram-pending.json.lock")
        );
    }

    #[tokio::test]
    async fn guard_drop_releases_the_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.lock");

        let guard = acquire(&path, "test").await.expect("first acquire");
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());

        let _again = acquire(&path, "test").await.expect("reacquire");
    }

    #[tokio::test]
    async fn held_lock_blocks_non_blocking_acquire() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("poller.lock");

        let _guard = acquire(&path, "test").await.expect("acquire");
        let second = try_acquire(&path, Duration::from_secs(120)).expect("try");
        assert!(second.is_none(), "live lock must not be stolen");
    }

    #[tokio::test]
    async fn dead_owner_lock_is_stolen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("poller.lock");
        fs::write(&path, "999999999\n").expect("seed dead-owner lock");

        assert!(is_stale(&path, LOCK_STALE_AGE));
        let guard = try_acquire(&path, Duration::from_secs(120)).expect("try");
        assert!(guard.is_some(), "dead-owner lock should be taken over");
    }

    #[test]
    fn fresh_lock_without_pid_is_not_stale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("poller.lock");
        fs::write(&path, "not-a-pid\n").expect("seed");

        assert!(!is_stale(&path, LOCK_STALE_AGE));
    }
}
