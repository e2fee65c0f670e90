//! consult-human configuration.
//!
//! TOML file resolved via `$CONSULT_HUMAN_CONFIG`, then
//! `$XDG_CONFIG_HOME/consult-human/config.toml`, then
//! `~/.config/consult-human/config.toml`. Environment overrides are applied
//! after parsing. A missing file is not an error; defaults apply.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "CONSULT_HUMAN_CONFIG";
pub const ENV_STATE_DIR: &str = "CONSULT_HUMAN_STATE_DIR";

const PENDING_FILE: &str = "telegram-pending.json";
const INBOX_FILE: &str = "telegram-inbox.json";
const POLLER_FILE: &str = "telegram-poller.lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            telegram: TelegramConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// 0 means "not linked yet": the first `ask` waits for /start.
    #[serde(default)]
    pub chat_id: i64,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Optional override for the pending-store file; the inbox and poller
    /// lock live in the same directory.
    #[serde(default)]
    pub pending_store_path: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: 0,
            poll_interval_seconds: default_poll_interval_seconds(),
            pending_store_path: None,
        }
    }
}

fn default_request_timeout() -> String {
    "15m".to_string()
}

fn default_poll_interval_seconds() -> u64 {
    2
}

/// The three files every process sharing a state directory agrees on.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub pending: PathBuf,
    pub inbox: PathBuf,
    pub poller: PathBuf,
}

pub fn config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        if !path.trim().is_empty() {
            return expand_home(&path);
        }
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.trim().is_empty() {
            return Ok(Path::new(&xdg).join("consult-human").join("config.toml"));
        }
    }
    let home = std::env::var("HOME").map_err(|_| anyhow!("HOME is not set"))?;
    Ok(Path::new(&home)
        .join(".config")
        .join("consult-human")
        .join("config.toml"))
}

pub fn load() -> Result<(Config, PathBuf)> {
    let path = config_path()?;
    let mut cfg = match std::fs::read_to_string(&path) {
        Ok(contents) => toml::from_str(&contents)
            .map_err(|e| anyhow!("parse config {}: {e}", path.display()))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(err) => return Err(anyhow!("read config {}: {err}", path.display())),
    };
    cfg.apply_env_overrides();
    cfg.normalize();
    Ok((cfg, path))
}

pub fn save(cfg: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create config dir {}", parent.display()))?;
    }
    let contents = toml::to_string_pretty(cfg).context("serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("write config {}", path.display()))?;
    // The file holds the bot token; keep it private.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    Ok(())
}

impl Config {
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !v.trim().is_empty() {
                self.telegram.bot_token = v;
            }
        }
        if let Ok(v) = std::env::var("CONSULT_HUMAN_TIMEOUT") {
            if !v.trim().is_empty() {
                self.request_timeout = v;
            }
        }
    }

    fn normalize(&mut self) {
        if self.request_timeout.trim().is_empty() {
            self.request_timeout = default_request_timeout();
        }
        if self.telegram.poll_interval_seconds == 0 {
            self.telegram.poll_interval_seconds = default_poll_interval_seconds();
        }
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        let timeout = humantime::parse_duration(self.request_timeout.trim())
            .map_err(|e| anyhow!("invalid request_timeout {:?}: {e}", self.request_timeout))?;
        if timeout.is_zero() {
            bail!("request_timeout must be > 0");
        }
        Ok(timeout)
    }

    /// Resolves the state files: environment override, then the configured
    /// pending-store path, then the platform state directory
    /// (`$XDG_STATE_HOME/consult-human` or `~/.local/state/consult-human`).
    pub fn store_paths(&self) -> Result<StorePaths> {
        let pending = if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
            if dir.trim().is_empty() {
                self.configured_pending_path()?
            } else {
                expand_home(&dir)?.join(PENDING_FILE)
            }
        } else {
            self.configured_pending_path()?
        };
        let state_dir = pending
            .parent()
            .ok_or_else(|| anyhow!("pending store path has no parent directory"))?
            .to_path_buf();
        Ok(StorePaths {
            inbox: state_dir.join(INBOX_FILE),
            poller: state_dir.join(POLLER_FILE),
            pending,
        })
    }

    fn configured_pending_path(&self) -> Result<PathBuf> {
        if let Some(configured) = self
            .telegram
            .pending_store_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            return expand_home(configured);
        }
        Ok(default_state_dir()?.join(PENDING_FILE))
    }

    pub fn get_key(&self, key: &str) -> Result<String> {
        match key.trim().to_lowercase().as_str() {
            "request_timeout" => Ok(self.request_timeout.clone()),
            "telegram.bot_token" => Ok(self.telegram.bot_token.clone()),
            "telegram.chat_id" => Ok(self.telegram.chat_id.to_string()),
            "telegram.poll_interval_seconds" => {
                Ok(self.telegram.poll_interval_seconds.to_string())
            }
            "telegram.pending_store_path" => {
                Ok(self.telegram.pending_store_path.clone().unwrap_or_default())
            }
            _ => bail!("unsupported key {key:?}"),
        }
    }

    pub fn set_key(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key.trim().to_lowercase().as_str() {
            "request_timeout" => {
                let parsed = humantime::parse_duration(value)
                    .map_err(|e| anyhow!("invalid duration: {e}"))?;
                if parsed.is_zero() {
                    bail!("request_timeout must be > 0");
                }
                self.request_timeout = value.to_string();
            }
            "telegram.bot_token" => self.telegram.bot_token = value.to_string(),
            "telegram.chat_id" => {
                self.telegram.chat_id = value
                    .parse::<i64>()
                    .map_err(|e| anyhow!("invalid telegram.chat_id: {e}"))?;
            }
            "telegram.poll_interval_seconds" => {
                let n = value
                    .parse::<u64>()
                    .map_err(|e| anyhow!("telegram.poll_interval_seconds must be a positive integer: {e}"))?;
                if n == 0 {
                    bail!("telegram.poll_interval_seconds must be a positive integer");
                }
                self.telegram.poll_interval_seconds = n;
            }
            "telegram.pending_store_path" => {
                self.telegram.pending_store_path =
                    (!value.is_empty()).then(|| value.to_string());
            }
            _ => bail!("unsupported key {key:?}"),
        }
        Ok(())
    }
}

fn default_state_dir() -> Result<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        if !xdg.trim().is_empty() {
            return Ok(Path::new(&xdg).join("consult-human"));
        }
    }
    let home = std::env::var("HOME").map_err(|_| anyhow!("HOME is not set"))?;
    Ok(Path::new(&home)
        .join(".local")
        .join("state")
        .join("consult-human"))
}

fn expand_home(path: &str) -> Result<PathBuf> {
    let trimmed = path.trim().to_string();
    if !trimmed.starts_with("~/") && trimmed != "~" {
        return Ok(PathBuf::from(trimmed));
    }
    let home = std::env::var("HOME").map_err(|_| anyhow!("HOME is not set"))?;
    if trimmed == "~" {
        return Ok(PathBuf::from(home));
    }
    Ok(PathBuf::from(trimmed.replacen('~', &home, 1)))
}

#[cfg(test)]
mod tests {
    use super::{Config, StorePaths};

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.request_timeout, "15m");
        assert_eq!(cfg.telegram.poll_interval_seconds, 2);
        assert_eq!(cfg.telegram.chat_id, 0);
    }

    #[test]
    fn toml_roundtrip_keeps_the_documented_keys() {
        let raw = r#"
request_timeout = "5m"

[telegram]
bot_token = "123:abc"
chat_id = 4242
poll_interval_seconds = 3
"#;
        let cfg: Config = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.telegram.bot_token, "123:abc");
        assert_eq!(cfg.telegram.chat_id, 4242);
        assert_eq!(cfg.telegram.poll_interval_seconds, 3);
        assert_eq!(cfg.request_timeout().expect("timeout").as_secs(), 300);

        let serialized = toml::to_string_pretty(&cfg).expect("serialize");
        assert!(serialized.contains("bot_token"));
        assert!(serialized.contains("chat_id"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("whatsapp_number = \"x\"").is_err());
    }

    #[test]
    fn timeout_validation() {
        let mut cfg = Config::default();
        cfg.request_timeout = "90s".to_string();
        assert_eq!(cfg.request_timeout().expect("parse").as_secs(), 90);

        cfg.request_timeout = "soon".to_string();
        assert!(cfg.request_timeout().is_err());
    }

    #[test]
    fn set_key_validates_values() {
        let mut cfg = Config::default();
        cfg.set_key("telegram.chat_id", "4242").expect("set");
        assert_eq!(cfg.telegram.chat_id, 4242);

        assert!(cfg.set_key("telegram.chat_id", "not-a-number").is_err());
        assert!(cfg.set_key("telegram.poll_interval_seconds", "0").is_err());
        assert!(cfg.set_key("request_timeout", "0s").is_err());
        assert!(cfg.set_key("active_provider", "smoke-signals").is_err());

        cfg.set_key("request_timeout", "30m").expect("set");
        assert_eq!(cfg.request_timeout, "30m");
    }

    #[test]
    fn save_then_parse_roundtrips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.telegram.bot_token = "123:abc".to_string();
        cfg.telegram.chat_id = 77;
        super::save(&cfg, &path).expect("save");

        let raw = std::fs::read_to_string(&path).expect("read");
        let loaded: Config = toml::from_str(&raw).expect("parse");
        assert_eq!(loaded.telegram.bot_token, "123:abc");
        assert_eq!(loaded.telegram.chat_id, 77);
    }

    #[test]
    fn store_paths_share_one_directory() {
        let mut cfg = Config::default();
        cfg.telegram.pending_store_path = Some("/tmp/ch-state/telegram-pending.json".to_string());
        let StorePaths {
            pending,
            inbox,
            poller,
        } = cfg.store_paths().expect("paths");
        assert_eq!(pending.parent(), inbox.parent());
        assert_eq!(inbox.parent(), poller.parent());
        assert!(inbox.ends_with("telegram-inbox.json"));
        assert!(poller.ends_with("telegram-poller.lock"));
    }
}
