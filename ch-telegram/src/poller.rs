//! Single-poller election.
//!
//! Telegram's `getUpdates` offset is confirm-on-next-call: two processes
//! polling the same bot interleave confirmations and lose updates. Exactly
//! one process per state directory may poll at a time; everyone else skips
//! the poll and goes straight to claiming from the shared inbox.

use std::path::PathBuf;
use std::time::Duration;

use ch_core::Result;

use crate::lockfile::{self, LockGuard};

/// A wedged or suspended poller must not block polling for long.
const POLLER_STALE_AGE: Duration = Duration::from_secs(120);

pub struct PollerLock {
    path: PathBuf,
}

impl PollerLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Non-blocking: `None` means another live process is polling right now.
    /// Locks owned by dead processes or older than two minutes are stolen.
    /// The returned guard releases on drop.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        lockfile::try_acquire(&self.path, POLLER_STALE_AGE)
    }
}

#[cfg(test)]
mod tests {
    use super::PollerLock;

    #[test]
    fn only_one_holder_at_a_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = PollerLock::new(dir.path().join("telegram-poller.lock"));

        let first = lock.try_acquire().expect("try").expect("acquired");
        assert!(lock.try_acquire().expect("try").is_none());

        drop(first);
        assert!(lock.try_acquire().expect("try").is_some());
    }

    #[test]
    fn dead_holder_is_displaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("telegram-poller.lock");
        std::fs::write(&path, "999999999\n").expect("seed");

        let lock = PollerLock::new(&path);
        assert!(lock.try_acquire().expect("try").is_some());
    }
}
