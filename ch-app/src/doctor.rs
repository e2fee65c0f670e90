//! The `doctor` command: config validation and basic health checks.

use anyhow::{bail, Result};

use ch_telegram::{ensure_polling_mode, HttpTelegramApi};

use crate::config;

pub async fn run() -> Result<()> {
    let (cfg, path) = config::load()?;
    println!("config: {}", path.display());

    let timeout = cfg.request_timeout()?;
    println!("request_timeout: {}", humantime::format_duration(timeout));

    let paths = cfg.store_paths()?;
    println!("state dir: {}", paths.pending.parent().unwrap_or(paths.pending.as_path()).display());

    let token = cfg.telegram.bot_token.trim();
    if token.is_empty() {
        bail!(
            "telegram.bot_token is not set; run: consult-human config set telegram.bot_token \"<BOT_TOKEN>\""
        );
    }
    println!("bot token: set");

    if cfg.telegram.chat_id == 0 {
        println!("chat: not linked (the first ask will wait for /start)");
    } else {
        println!("chat: linked ({})", cfg.telegram.chat_id);
    }

    let api = HttpTelegramApi::new(token)?;
    ensure_polling_mode(&api).await?;
    println!("webhook: none; long polling is available");

    Ok(())
}
