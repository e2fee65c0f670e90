//! consult-human main binary.
//!
//! Stdout is reserved for the machine-parseable answer payload; every
//! diagnostic, including tracing output, goes to stderr.

mod ask;
mod config;
mod doctor;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "consult-human",
    version,
    about = "Ask a human over Telegram and wait for the reply"
)]
struct Cli {
    /// Path to a .env file to load before startup.
    #[arg(short = 'e', long = "env", global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask a question and block until the human answers.
    Ask {
        /// Choice in the form "id:text" or plain text. Repeatable.
        #[arg(long = "choice", value_name = "CHOICE")]
        choices: Vec<String>,

        /// Allow a free-text answer outside the predefined choices.
        #[arg(long)]
        allow_other: bool,

        /// Override the configured request timeout (e.g. "5m", "90s").
        #[arg(long, value_name = "DURATION")]
        timeout: Option<String>,

        /// The question to relay.
        #[arg(required = true, value_name = "QUESTION")]
        question: Vec<String>,
    },
    /// Inspect or edit configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Validate configuration and check that Telegram polling is available.
    Doctor,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print the config file path.
    Path,
    /// Print one configuration value.
    Get { key: String },
    /// Set one configuration value and save the file.
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if let Some(env_path) = &cli.env_file {
        dotenvy::from_path_override(env_path)
            .with_context(|| format!("failed to load env file: {}", env_path.display()))?;
    }

    match cli.command {
        Command::Ask {
            choices,
            allow_other,
            timeout,
            question,
        } => ask::run(choices, allow_other, timeout, question).await,
        Command::Config { action } => run_config(action),
        Command::Doctor => doctor::run().await,
    }
}

fn run_config(action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", config::config_path()?.display());
            Ok(())
        }
        ConfigAction::Get { key } => {
            let (cfg, _) = config::load()?;
            println!("{}", cfg.get_key(&key)?);
            Ok(())
        }
        ConfigAction::Set { key, value } => {
            let (mut cfg, path) = config::load()?;
            cfg.set_key(&key, &value)?;
            config::save(&cfg, &path)?;
            tracing::info!(key, path = %path.display(), "configuration updated");
            Ok(())
        }
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
