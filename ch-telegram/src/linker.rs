//! First-time chat discovery.
//!
//! Until the human opens a chat with the bot there is no chat id to send to.
//! Linking watches incoming updates for a `/start` command and binds to the
//! chat that sent it; the caller persists the id so this only happens once.

use ch_core::{RelayError, Result};

use crate::api::TelegramApi;

const NOT_LINKED: &str = "telegram chat is not linked; send /start to the bot first";

/// First whitespace-delimited token equal to `/start`, or `/start@<bot>` with
/// a non-empty suffix, case-insensitive.
pub fn is_start_command(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    let Some(token) = lowered.split_whitespace().next() else {
        return false;
    };
    token == "/start" || (token.starts_with("/start@") && token.len() > "/start@".len())
}

/// Polls with a rolling local offset until some chat sends `/start`, then
/// returns that chat's id. Gives up with a precondition error at `deadline`.
pub async fn discover_chat(
    api: &dyn TelegramApi,
    poll_timeout_seconds: u64,
    deadline: tokio::time::Instant,
) -> Result<i64> {
    let mut offset: i64 = 0;
    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(RelayError::Precondition(NOT_LINKED.to_string()));
        }

        let updates =
            match tokio::time::timeout_at(deadline, api.get_updates(offset, poll_timeout_seconds))
                .await
            {
                Ok(result) => result?,
                Err(_) => return Err(RelayError::Precondition(NOT_LINKED.to_string())),
            };

        for update in &updates {
            offset = offset.max(update.update_id + 1);
            let Some(message) = &update.message else {
                continue;
            };
            let Some(text) = message.text.as_deref() else {
                continue;
            };
            if is_start_command(text) {
                tracing::info!(chat_id = message.chat.id, "linked telegram chat via /start");
                return Ok(message.chat.id);
            }
        }
    }
}
