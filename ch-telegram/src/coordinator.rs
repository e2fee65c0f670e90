//! End-to-end orchestration of one question.
//!
//! States: validate preconditions, send the prompt, register the pending
//! record, absorb the upstream backlog, then loop: poll (if elected),
//! sample the pending count, try to claim a reply, maybe remind, sleep.
//! On every exit path (claim, timeout, fatal error) the pending record is
//! deleted; a crash leaves it to orphan pruning.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use ch_core::{AskRequest, RelayError, Reply, Result};

use crate::api::TelegramApi;
use crate::inbox::{InboxEntry, InboxStore};
use crate::lockfile;
use crate::pending::{PendingRecord, PendingStore};
use crate::poller::PollerLock;
use crate::prompt;

const WAIT_LOOP_DELAY: Duration = Duration::from_millis(150);
const REMINDER_COOLDOWN: Duration = Duration::from_secs(20);
/// Pending records outlive the caller's deadline by this much so a claim
/// racing the timeout still finds the record.
const PENDING_GRACE_SECS: i64 = 60;

/// Polling mode requires that no webhook is registered for the bot; Telegram
/// rejects `getUpdates` otherwise.
pub async fn ensure_polling_mode(api: &dyn TelegramApi) -> Result<()> {
    let info = api.get_webhook_info().await?;
    let url = info.url.trim();
    if !url.is_empty() {
        return Err(RelayError::Config(format!(
            "a telegram webhook is configured ({url}); long polling requires no webhook. \
             Clear it with the Bot API deleteWebhook method and retry"
        )));
    }
    Ok(())
}

pub struct AskCoordinator<'a> {
    api: &'a dyn TelegramApi,
    pending: &'a PendingStore,
    inbox: &'a InboxStore,
    poller: &'a PollerLock,
    chat_id: i64,
    poll_interval_seconds: u64,
    last_reminder_at: Option<Instant>,
}

impl<'a> AskCoordinator<'a> {
    pub fn new(
        api: &'a dyn TelegramApi,
        pending: &'a PendingStore,
        inbox: &'a InboxStore,
        poller: &'a PollerLock,
        chat_id: i64,
        poll_interval_seconds: u64,
    ) -> Self {
        Self {
            api,
            pending,
            inbox,
            poller,
            chat_id,
            poll_interval_seconds,
            last_reminder_at: None,
        }
    }

    /// Sends the prompt and blocks until a reply is claimed or `deadline`
    /// passes. Cancellation from outside (dropping this future) releases any
    /// held lock via its guard; the caller is expected to delete the pending
    /// record afterwards, and orphan pruning covers unclean exits.
    pub async fn ask(&mut self, req: &AskRequest, deadline: Instant) -> Result<Reply> {
        ensure_polling_mode(self.api).await?;
        if self.chat_id == 0 {
            return Err(RelayError::Precondition(
                "telegram chat is not linked; send /start to the bot first".to_string(),
            ));
        }

        let rendered = prompt::render_prompt(req);
        let message_id = self.api.send_message(self.chat_id, &rendered).await?;
        tracing::info!(
            request_id = %req.request_id,
            message_id,
            chat_id = self.chat_id,
            "prompt sent"
        );

        self.register_pending(req, message_id, deadline).await?;

        // Absorb whatever was already queued upstream so the wait loop only
        // judges messages sent after the prompt.
        match tokio::time::timeout_at(deadline, self.poll_once()).await {
            Ok(Ok(_)) | Err(_) => {}
            Ok(Err(error)) if error.is_transient() => {
                tracing::warn!(%error, "initial drain failed; wait loop will retry");
            }
            Ok(Err(error)) => {
                self.cleanup(&req.request_id).await;
                return Err(error);
            }
        }

        loop {
            if Instant::now() >= deadline {
                self.cleanup(&req.request_id).await;
                return Err(RelayError::Timeout);
            }

            match tokio::time::timeout_at(deadline, self.poll_once()).await {
                Ok(Ok(_)) => {}
                Ok(Err(error)) if error.is_transient() => {
                    tracing::warn!(%error, "telegram poll failed; retrying");
                }
                Ok(Err(error)) => {
                    self.cleanup(&req.request_id).await;
                    return Err(error);
                }
                // Deadline passed mid-poll; the loop head turns it into Timeout.
                Err(_) => continue,
            }

            let pending_count = match self.pending.count_by_chat(self.chat_id).await {
                Ok(count) => count,
                Err(error) => {
                    self.cleanup(&req.request_id).await;
                    return Err(error);
                }
            };

            let (entry, needs_reminder) = match self
                .inbox
                .claim_for_request(self.chat_id, message_id, pending_count)
                .await
            {
                Ok(outcome) => outcome,
                Err(error) => {
                    self.cleanup(&req.request_id).await;
                    return Err(error);
                }
            };

            if let Some(entry) = entry {
                self.cleanup(&req.request_id).await;
                tracing::info!(
                    request_id = %req.request_id,
                    provider_message_id = entry.message_id,
                    "reply claimed"
                );
                return Ok(reply_from_entry(&req.request_id, entry));
            }

            if needs_reminder {
                self.maybe_send_reminder(pending_count).await;
            }

            let wake = Instant::now() + WAIT_LOOP_DELAY;
            tokio::time::sleep_until(wake.min(deadline)).await;
        }
    }

    async fn register_pending(
        &self,
        req: &AskRequest,
        message_id: i64,
        deadline: Instant,
    ) -> Result<()> {
        let now = Utc::now();
        let remaining = deadline.saturating_duration_since(Instant::now());
        let remaining =
            chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
        self.pending
            .upsert(PendingRecord {
                request_id: req.request_id.clone(),
                chat_id: self.chat_id,
                message_id,
                created_at: now,
                expires_at: Some(now + remaining + chrono::Duration::seconds(PENDING_GRACE_SECS)),
                owner_pid: std::process::id() as i32,
                owner_host: lockfile::local_hostname(),
            })
            .await
    }

    /// One poll cycle: only the elected poller talks to `getUpdates`; losers
    /// return immediately and rely on the shared inbox. Returns whether this
    /// process polled.
    async fn poll_once(&self) -> Result<bool> {
        let Some(_poller_guard) = self.poller.try_acquire()? else {
            return Ok(false);
        };
        let offset = self.inbox.next_offset().await?;
        let updates = self
            .api
            .get_updates(offset, self.poll_interval_seconds)
            .await?;
        if !updates.is_empty() {
            let (added, next_offset) = self.inbox.append_updates(&updates).await?;
            tracing::debug!(added, next_offset, "ingested telegram updates");
        }
        Ok(true)
    }

    async fn maybe_send_reminder(&mut self, pending_count: usize) {
        if pending_count <= 1 {
            return;
        }
        let now = Instant::now();
        if let Some(last) = self.last_reminder_at {
            if now.duration_since(last) < REMINDER_COOLDOWN {
                return;
            }
        }
        self.last_reminder_at = Some(now);
        if let Err(error) = self
            .api
            .send_message(self.chat_id, &prompt::reminder_text(pending_count))
            .await
        {
            tracing::warn!(%error, "failed to send threading reminder");
        }
    }

    async fn cleanup(&self, request_id: &str) {
        if let Err(error) = self.pending.delete(request_id).await {
            tracing::warn!(%error, request_id, "failed to delete pending record");
        }
    }
}

fn reply_from_entry(request_id: &str, entry: InboxEntry) -> Reply {
    let from = if entry.username.is_empty() {
        format!("{} {}", entry.first_name, entry.last_name)
            .trim()
            .to_string()
    } else {
        entry.username.clone()
    };
    Reply {
        request_id: request_id.to_string(),
        text: entry.text.clone(),
        from,
        provider_message_id: entry.message_id.to_string(),
        received_at: DateTime::from_timestamp(entry.date, 0).unwrap_or_else(Utc::now),
        raw: entry.text,
    }
}
