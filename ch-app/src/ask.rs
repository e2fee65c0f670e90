//! The `ask` command: one question in, one JSON payload out.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::collections::HashSet;

use ch_core::classify::{classify_choice_reply, normalize_choice_id};
use ch_core::{AskRequest, AskResult, Choice, QuestionType, RelayError};
use ch_telegram::{
    discover_chat, ensure_polling_mode, AskCoordinator, HttpTelegramApi, InboxStore,
    PendingStore, PollerLock,
};

use crate::config;

const PROVIDER: &str = "telegram";

pub async fn run(
    raw_choices: Vec<String>,
    allow_other: bool,
    timeout_override: Option<String>,
    question_words: Vec<String>,
) -> Result<()> {
    let question = question_words.join(" ").trim().to_string();
    if question.is_empty() {
        bail!("missing question");
    }
    let choices = parse_choices(&raw_choices)?;
    if choices.is_empty() && allow_other {
        bail!("--allow-other requires at least one --choice");
    }

    let (mut cfg, cfg_path) = config::load()?;
    let token = cfg.telegram.bot_token.trim().to_string();
    if token.is_empty() {
        bail!(
            "telegram.bot_token is required.\n\
             First-time Telegram setup:\n\
             1) Open Telegram and chat with @BotFather\n\
             2) Run /newbot and copy the bot token\n\
             3) Run: consult-human config set telegram.bot_token \"<BOT_TOKEN>\"\n\
             4) Run: consult-human ask ... then send /start to your bot to link the chat"
        );
    }

    let mut timeout = cfg.request_timeout()?;
    if let Some(raw) = timeout_override.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        timeout = humantime::parse_duration(raw)
            .map_err(|e| anyhow::anyhow!("invalid --timeout: {e}"))?;
        if timeout.is_zero() {
            bail!("--timeout must be > 0");
        }
    }

    let request = AskRequest {
        request_id: new_request_id(),
        question,
        question_type: if choices.is_empty() {
            QuestionType::Open
        } else {
            QuestionType::Choice
        },
        choices,
        allow_other,
        sent_at: Utc::now(),
    };

    let api = HttpTelegramApi::new(&token)?;
    let paths = cfg.store_paths()?;
    let pending = PendingStore::new(&paths.pending);
    let inbox = InboxStore::new(&paths.inbox);
    let poller = PollerLock::new(&paths.poller);

    let deadline = tokio::time::Instant::now() + timeout;

    let mut chat_id = cfg.telegram.chat_id;
    if chat_id == 0 {
        ensure_polling_mode(&api).await?;
        tracing::info!("chat not linked yet; send /start to the bot");
        chat_id = discover_chat(&api, cfg.telegram.poll_interval_seconds, deadline).await?;
        cfg.telegram.chat_id = chat_id;
        if let Err(error) = config::save(&cfg, &cfg_path) {
            tracing::warn!(%error, "failed to persist linked chat id");
        }
    }

    let mut coordinator = AskCoordinator::new(
        &api,
        &pending,
        &inbox,
        &poller,
        chat_id,
        cfg.telegram.poll_interval_seconds,
    );

    tracing::info!(request_id = %request.request_id, "sending request via telegram");
    tracing::info!("waiting for human reply");
    let outcome = tokio::select! {
        result = coordinator.ask(&request, deadline) => result,
        _ = tokio::signal::ctrl_c() => Err(RelayError::Cancelled),
    };

    let reply = match outcome {
        Ok(reply) => reply,
        Err(error) => {
            if matches!(error, RelayError::Cancelled) {
                // The select dropped the coordinator mid-wait; finish its
                // cleanup so the record does not linger until orphan pruning.
                if let Err(cleanup) = pending.delete(&request.request_id).await {
                    tracing::warn!(error = %cleanup, "failed to delete pending record");
                }
            }
            return Err(error.into());
        }
    };

    let result = build_result(&request, reply.text.trim(), &reply.raw, reply.received_at);
    let payload = serde_json::to_string(&result).context("encode result payload")?;
    println!("{payload}");
    Ok(())
}

fn build_result(
    request: &AskRequest,
    text: &str,
    raw: &str,
    received_at: chrono::DateTime<Utc>,
) -> AskResult {
    let (selected_ids, other_text) = if request.question_type == QuestionType::Choice {
        classify_choice_reply(request, text)
    } else {
        (Vec::new(), String::new())
    };
    AskResult {
        request_id: request.request_id.clone(),
        provider: PROVIDER.to_string(),
        question_type: request.question_type,
        text: text.to_string(),
        selected_ids,
        other_text,
        raw_reply: raw.to_string(),
        received_at,
    }
}

fn parse_choices(raw: &[String]) -> Result<Vec<Choice>> {
    let mut choices = Vec::new();
    let mut seen = HashSet::new();
    for (i, item) in raw.iter().enumerate() {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (id, text) = match item.split_once(':') {
            Some((id, text)) => (normalize_choice_id(id), text.trim().to_string()),
            None => (auto_choice_id(i), item.to_string()),
        };
        if id.is_empty() || text.is_empty() {
            bail!("invalid choice {item:?}");
        }
        if !seen.insert(id.clone()) {
            bail!("duplicate choice id {id:?}");
        }
        choices.push(Choice { id, text });
    }
    Ok(choices)
}

fn auto_choice_id(i: usize) -> String {
    if i < 26 {
        ((b'A' + i as u8) as char).to_string()
    } else {
        format!("C{}", i + 1)
    }
}

fn new_request_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::{auto_choice_id, build_result, new_request_id, parse_choices};
    use ch_core::{AskRequest, Choice, QuestionType};
    use chrono::{TimeZone, Utc};

    #[test]
    fn request_ids_are_sixteen_hex_chars() {
        let id = new_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(new_request_id(), new_request_id());
    }

    #[test]
    fn choices_parse_with_explicit_and_auto_ids() {
        let parsed = parse_choices(&[
            "a: Shared memory".to_string(),
            "Inline tables".to_string(),
        ])
        .expect("parse");
        assert_eq!(
            parsed,
            vec![
                Choice {
                    id: "A".to_string(),
                    text: "Shared memory".to_string()
                },
                Choice {
                    id: "B".to_string(),
                    text: "Inline tables".to_string()
                },
            ]
        );
    }

    #[test]
    fn auto_ids_walk_the_alphabet_then_number() {
        assert_eq!(auto_choice_id(0), "A");
        assert_eq!(auto_choice_id(25), "Z");
        assert_eq!(auto_choice_id(26), "C27");
    }

    #[test]
    fn duplicate_and_malformed_choices_are_rejected() {
        assert!(parse_choices(&["a: one".to_string(), "A: two".to_string()]).is_err());
        assert!(parse_choices(&[": no id".to_string()]).is_err());
        assert!(parse_choices(&["a:".to_string()]).is_err());
    }

    #[test]
    fn open_payload_has_the_exact_documented_shape() {
        let request = AskRequest {
            request_id: "00c0ffee00c0ffee".to_string(),
            question: "Ship it?".to_string(),
            question_type: QuestionType::Open,
            choices: Vec::new(),
            allow_other: false,
            sent_at: Utc::now(),
        };
        let received_at = Utc.with_ymd_and_hms(2026, 8, 2, 10, 30, 0).unwrap();
        let result = build_result(&request, "ship it", "ship it", received_at);
        let payload = serde_json::to_string(&result).expect("encode");
        assert_eq!(
            payload,
            r#"{"request_id":"00c0ffee00c0ffee","provider":"telegram","question_type":"open","text":"ship it","raw_reply":"ship it","received_at":"2026-08-02T10:30:00Z"}"#
        );
    }

    #[test]
    fn payload_leaves_html_characters_unescaped() {
        let request = AskRequest {
            request_id: "00c0ffee00c0ffee".to_string(),
            question: "Ship it?".to_string(),
            question_type: QuestionType::Open,
            choices: Vec::new(),
            allow_other: false,
            sent_at: Utc::now(),
        };
        let received_at = Utc.with_ymd_and_hms(2026, 8, 2, 10, 30, 0).unwrap();
        let result = build_result(&request, "a < b && c > d", "a < b && c > d", received_at);
        let payload = serde_json::to_string(&result).expect("encode");
        assert!(payload.contains("a < b && c > d"));
        assert!(!payload.contains("\\u003c"), "HTML characters must stay literal");
    }

    #[test]
    fn choice_payload_carries_classified_selection() {
        let request = AskRequest {
            request_id: "00c0ffee00c0ffee".to_string(),
            question: "Which?".to_string(),
            question_type: QuestionType::Choice,
            choices: vec![
                Choice {
                    id: "A".to_string(),
                    text: "Shared".to_string(),
                },
                Choice {
                    id: "B".to_string(),
                    text: "Inline".to_string(),
                },
            ],
            allow_other: false,
            sent_at: Utc::now(),
        };
        let received_at = Utc.with_ymd_and_hms(2026, 8, 2, 10, 30, 0).unwrap();
        let result = build_result(&request, "B", "B", received_at);
        assert_eq!(result.selected_ids, vec!["B"]);
        assert_eq!(result.other_text, "");

        let payload = serde_json::to_string(&result).expect("encode");
        assert!(payload.contains(r#""selected_ids":["B"]"#));
        assert!(!payload.contains("other_text"), "empty other_text is omitted");
    }
}
