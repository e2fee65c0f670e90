//! Durable inbox of ingested `getUpdates` results.
//!
//! One file per state directory holds the shared poll offset and the entries
//! nobody has claimed yet. `next_offset` only ever moves forward, so each
//! upstream update lands in the inbox exactly once no matter how many
//! processes take turns polling. Claiming applies the reply-matching policy:
//! a threaded reply to the request's prompt always wins; free text is only
//! accepted when a single request is pending for the chat.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use ch_core::{RelayError, Result};

use crate::api::Update;
use crate::lockfile;

/// Threaded replies carry explicit intent, so they wait around longer than
/// loose chatter before the TTL reaps them.
const REPLY_TTL_MINUTES: i64 = 20;
const LOOSE_TTL_MINUTES: i64 = 5;
const MAX_ENTRIES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub update_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    #[serde(default, skip_serializing_if = "id_is_unset")]
    pub reply_to_message_id: i64,
    pub text: String,
    pub date: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_name: String,
    pub ingested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn id_is_unset(id: &i64) -> bool {
    *id == 0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InboxState {
    #[serde(default)]
    next_offset: i64,
    #[serde(default)]
    entries: Vec<InboxEntry>,
}

pub struct InboxStore {
    path: PathBuf,
    lock_path: PathBuf,
    tmp_path: PathBuf,
}

impl InboxStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lockfile::sibling(&path, ".lock");
        let tmp_path = lockfile::sibling(&path, ".tmp");
        Self {
            path,
            lock_path,
            tmp_path,
        }
    }

    /// The offset the next `getUpdates` call must pass.
    pub async fn next_offset(&self) -> Result<i64> {
        let _guard = lockfile::acquire(&self.lock_path, "inbox store").await?;
        let (state, changed) = self.load_pruned(Utc::now())?;
        if changed {
            self.save(&state)?;
        }
        Ok(state.next_offset)
    }

    /// Ingests one poll batch: dedupes by `update_id`, admits only entries
    /// with non-empty text, advances the shared offset, and truncates the
    /// oldest surplus beyond the capacity cap. Returns `(added, next_offset)`.
    pub async fn append_updates(&self, updates: &[Update]) -> Result<(usize, i64)> {
        if updates.is_empty() {
            return Ok((0, self.next_offset().await?));
        }

        let _guard = lockfile::acquire(&self.lock_path, "inbox store").await?;
        let now = Utc::now();
        let (mut state, _) = self.load_pruned(now)?;

        let mut seen: HashSet<i64> = state.entries.iter().map(|e| e.update_id).collect();
        let mut added = 0;
        let mut max_update = 0i64;
        for update in updates {
            max_update = max_update.max(update.update_id);
            if !seen.insert(update.update_id) {
                continue;
            }
            let Some(message) = &update.message else {
                continue;
            };
            let Some(text) = message.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
            else {
                continue;
            };

            let reply_to_message_id = message
                .reply_to_message
                .as_ref()
                .map(|r| r.message_id)
                .unwrap_or(0);
            let ttl = if reply_to_message_id > 0 {
                Duration::minutes(REPLY_TTL_MINUTES)
            } else {
                Duration::minutes(LOOSE_TTL_MINUTES)
            };

            let (username, first_name, last_name) = match &message.from {
                Some(from) => (
                    from.username.trim().to_string(),
                    from.first_name.trim().to_string(),
                    from.last_name.trim().to_string(),
                ),
                None => Default::default(),
            };
            state.entries.push(InboxEntry {
                update_id: update.update_id,
                chat_id: message.chat.id,
                message_id: message.message_id,
                reply_to_message_id,
                text: text.to_string(),
                date: message.date,
                username,
                first_name,
                last_name,
                ingested_at: now,
                expires_at: now + ttl,
            });
            added += 1;
        }

        if max_update > 0 && max_update + 1 > state.next_offset {
            state.next_offset = max_update + 1;
        }
        state.entries.sort_by_key(|e| e.update_id);
        if state.entries.len() > MAX_ENTRIES {
            let surplus = state.entries.len() - MAX_ENTRIES;
            state.entries.drain(..surplus);
        }

        let next_offset = state.next_offset;
        self.save(&state)?;
        Ok((added, next_offset))
    }

    /// Scans entries in `update_id` order for one that answers the request
    /// whose prompt was `target_message_id` in `chat_id`. The first accepted
    /// entry is removed and returned. `needs_reminder` turns true when free
    /// text had to be quarantined because several requests were pending.
    pub async fn claim_for_request(
        &self,
        chat_id: i64,
        target_message_id: i64,
        pending_count: usize,
    ) -> Result<(Option<InboxEntry>, bool)> {
        let _guard = lockfile::acquire(&self.lock_path, "inbox store").await?;
        let (mut state, _) = self.load_pruned(Utc::now())?;

        let mut claimed = None;
        let mut needs_reminder = false;
        let mut changed = false;
        let mut i = 0;
        while i < state.entries.len() {
            let entry = &state.entries[i];
            if entry.chat_id != chat_id {
                i += 1;
                continue;
            }

            if target_message_id > 0 && entry.reply_to_message_id == target_message_id {
                claimed = Some(state.entries.remove(i));
                changed = true;
                break;
            }

            if pending_count > 1 {
                if entry.reply_to_message_id == 0 && entry.message_id > target_message_id {
                    // Free text while several prompts are outstanding cannot
                    // be routed safely; quarantine it and nudge the human.
                    needs_reminder = true;
                    state.entries.remove(i);
                    changed = true;
                    continue;
                }
                if entry.reply_to_message_id == 0 && entry.message_id <= target_message_id {
                    // Pre-request chatter.
                    state.entries.remove(i);
                    changed = true;
                    continue;
                }
                // Threaded reply to some other prompt; not ours to touch.
                i += 1;
                continue;
            }

            // Single-pending fallback.
            if entry.reply_to_message_id != 0 && entry.reply_to_message_id != target_message_id {
                state.entries.remove(i);
                changed = true;
                continue;
            }
            if entry.message_id <= target_message_id {
                state.entries.remove(i);
                changed = true;
                continue;
            }
            claimed = Some(state.entries.remove(i));
            changed = true;
            break;
        }

        if changed {
            self.save(&state)?;
        }
        Ok((claimed, needs_reminder))
    }

    fn load_pruned(&self, now: DateTime<Utc>) -> Result<(InboxState, bool)> {
        let mut state = self.load()?;
        let before = state.entries.len();
        state.entries.retain(|e| e.expires_at > now);
        let changed = state.entries.len() != before;
        Ok((state, changed))
    }

    fn load(&self) -> Result<InboxState> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(InboxState::default()),
            Err(err) => return Err(RelayError::store(err)),
        };
        if bytes.is_empty() {
            return Ok(InboxState::default());
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| RelayError::Store(format!("parse inbox store: {e}")))
    }

    fn save(&self, state: &InboxState) -> Result<()> {
        let bytes = serde_json::to_vec(state).map_err(RelayError::store)?;
        fs::write(&self.tmp_path, bytes).map_err(RelayError::store)?;
        fs::rename(&self.tmp_path, &self.path).map_err(|err| {
            let _ = fs::remove_file(&self.tmp_path);
            RelayError::store(err)
        })
    }
}
