//! Durable registry of prompts that are still waiting for a reply.
//!
//! Each record marks "some local process sent a prompt and is blocked on the
//! answer". Every operation takes the store's sentinel lock, prunes records
//! whose owner died or whose deadline passed, and persists atomically via a
//! tmp file rename. The on-disk shape is a JSON object keyed by request id.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use ch_core::{RelayError, Result};

use crate::lockfile;

/// Records written before deadlines were tracked fall back to this TTL from
/// `created_at`. New records always carry `expires_at`.
const LEGACY_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub request_id: String,
    pub chat_id: i64,
    pub message_id: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "pid_is_unset")]
    pub owner_pid: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner_host: String,
}

fn pid_is_unset(pid: &i32) -> bool {
    *pid <= 0
}

type PendingMap = HashMap<String, PendingRecord>;

pub struct PendingStore {
    path: PathBuf,
    lock_path: PathBuf,
    tmp_path: PathBuf,
    local_host: String,
}

impl PendingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lockfile::sibling(&path, ".lock");
        let tmp_path = lockfile::sibling(&path, ".tmp");
        Self {
            path,
            lock_path,
            tmp_path,
            local_host: lockfile::local_hostname(),
        }
    }

    pub async fn upsert(&self, mut record: PendingRecord) -> Result<()> {
        if record.request_id.trim().is_empty() || record.chat_id == 0 || record.message_id == 0 {
            return Err(RelayError::Store("invalid pending record".to_string()));
        }
        let _guard = lockfile::acquire(&self.lock_path, "pending store").await?;
        let now = Utc::now();
        if record.expires_at.is_none() {
            record.expires_at = Some(record.created_at + Duration::hours(LEGACY_TTL_HOURS));
        }
        let (mut state, _) = self.load_pruned(now)?;
        state.insert(record.request_id.clone(), record);
        self.save(&state)
    }

    pub async fn get(&self, request_id: &str) -> Result<Option<PendingRecord>> {
        let _guard = lockfile::acquire(&self.lock_path, "pending store").await?;
        let (state, changed) = self.load_pruned(Utc::now())?;
        if changed {
            self.save(&state)?;
        }
        Ok(state.get(request_id).cloned())
    }

    pub async fn delete(&self, request_id: &str) -> Result<()> {
        let _guard = lockfile::acquire(&self.lock_path, "pending store").await?;
        let (mut state, _) = self.load_pruned(Utc::now())?;
        state.remove(request_id);
        self.save(&state)
    }

    pub async fn count_by_chat(&self, chat_id: i64) -> Result<usize> {
        let _guard = lockfile::acquire(&self.lock_path, "pending store").await?;
        let (state, changed) = self.load_pruned(Utc::now())?;
        if changed {
            self.save(&state)?;
        }
        Ok(state.values().filter(|r| r.chat_id == chat_id).count())
    }

    fn load_pruned(&self, now: DateTime<Utc>) -> Result<(PendingMap, bool)> {
        let mut state = self.load()?;
        let changed = prune_records(&mut state, now, &self.local_host);
        Ok((state, changed))
    }

    fn load(&self) -> Result<PendingMap> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PendingMap::new()),
            Err(err) => return Err(RelayError::store(err)),
        };
        if bytes.is_empty() {
            return Ok(PendingMap::new());
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| RelayError::Store(format!("parse pending store: {e}")))
    }

    fn save(&self, state: &PendingMap) -> Result<()> {
        let bytes = serde_json::to_vec(state).map_err(RelayError::store)?;
        fs::write(&self.tmp_path, bytes).map_err(RelayError::store)?;
        fs::rename(&self.tmp_path, &self.path).map_err(|err| {
            let _ = fs::remove_file(&self.tmp_path);
            RelayError::store(err)
        })
    }
}

fn prune_records(state: &mut PendingMap, now: DateTime<Utc>, local_host: &str) -> bool {
    let before = state.len();
    state.retain(|_, record| !record_expired(record, now, local_host));
    if state.len() != before {
        tracing::debug!(
            removed = before - state.len(),
            "pruned expired or orphaned pending records"
        );
        true
    } else {
        false
    }
}

fn record_expired(record: &PendingRecord, now: DateTime<Utc>, local_host: &str) -> bool {
    if record_orphaned(record, local_host) {
        return true;
    }
    match record.expires_at {
        Some(expires_at) => expires_at <= now,
        None => record.created_at + Duration::hours(LEGACY_TTL_HOURS) <= now,
    }
}

/// A record is orphaned when it names this host and its owner PID no longer
/// exists. Foreign-host records are only ever removed by TTL.
fn record_orphaned(record: &PendingRecord, local_host: &str) -> bool {
    if record.owner_pid <= 0 || !cfg!(unix) {
        return false;
    }
    if !record.owner_host.is_empty() {
        if local_host.is_empty() {
            return false;
        }
        if !record.owner_host.trim().eq_ignore_ascii_case(local_host) {
            return false;
        }
    }
    !lockfile::process_alive(record.owner_pid)
}
