//! # Botloop: long-polling bot engine
//!
//! Replays a file of updates through the full engine: fetch worker,
//! dispatcher, worker pool, persistence.
//!
//! Usage:
//!   botloop run --updates updates.json          # Poll until Ctrl-C
//!   botloop run --updates updates.json --once   # Stop once every update is handled
//!   botloop check-config --config bot.toml      # Validate and print the effective config

mod replay;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use botloop_core::{BotConfig, EventKind};
use botloop_dispatch::Filters;
use botloop_poller::Bot;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::replay::ReplaySource;

#[derive(Parser)]
#[command(name = "botloop", version, about = "🤖 Botloop: long-polling bot engine")]
struct Cli {
    /// Config file (default: ~/.botloop/config.toml)
    #[arg(short, long, env = "BOTLOOP_CONFIG", global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll a replay file and dispatch its updates
    Run {
        /// JSON array of updates
        #[arg(short, long)]
        updates: String,

        /// Stop once every update has been handled
        #[arg(long)]
        once: bool,
    },
    /// Validate the config and print it with defaults filled in
    CheckConfig,
}

fn load_config(path: Option<&str>) -> Result<BotConfig> {
    let config = match path {
        Some(p) => BotConfig::load_from(&PathBuf::from(shellexpand::tilde(p).to_string()))?,
        None => BotConfig::load()?,
    };
    Ok(config)
}

/// Demo handlers: greet on /start, log everything else.
fn install_handlers(bot: &Bot) {
    bot.message_handler(Filters::new().commands(["start"]), "start", |event, _| {
        let who = event.sender().map_or("stranger", |u| u.first_name.as_str());
        tracing::info!("👋 /start from {who}");
        Ok(())
    });

    let remember = bot.named_callback("remember_name", |event, args| {
        let name = event.message().and_then(|m| m.text.as_deref()).unwrap_or("");
        tracing::info!("📝 Next step answer '{name}' (args {args:?})");
        Ok(())
    });
    let bot_registry = bot.registry().clone();
    bot.message_handler(Filters::new().commands(["name"]), "ask_name", move |event, _| {
        if let Some(message) = event.message() {
            tracing::info!("❓ Asking chat {} for a name", message.chat.id);
            bot_registry.register_next_step(
                message.chat.id,
                remember.clone().with_args(vec![json!(message.message_id)]),
            );
        }
        Ok(())
    });

    bot.message_handler(Filters::new().any_content(), "log_message", |event, _| {
        if let Some(message) = event.message() {
            tracing::info!(
                "💬 [{}] {}: {}",
                message.chat.id,
                message.content_type(),
                message.text.as_deref().unwrap_or("")
            );
        }
        Ok(())
    });

    bot.callback_query_handler(Filters::new(), "log_callback", |event, _| {
        tracing::info!("🔘 Callback query: {:?}", event.sender().map(|u| u.id));
        Ok(())
    });

    for kind in EventKind::ALL {
        if matches!(kind, EventKind::Message | EventKind::CallbackQuery) {
            continue;
        }
        bot.register(kind, Filters::new().any_content(), &format!("log_{kind}"), |event, _| {
            tracing::info!("📨 {} from {:?}", event.kind(), event.sender().map(|u| u.id));
            Ok(())
        });
    }
}

async fn run(config: BotConfig, updates: &str, once: bool) -> Result<()> {
    let source = Arc::new(ReplaySource::from_file(&PathBuf::from(
        shellexpand::tilde(updates).to_string(),
    ))?);
    if source.is_empty() {
        tracing::warn!("⚠️ {updates} holds no updates");
    } else {
        tracing::info!("📂 Loaded {} updates from {}", source.len(), updates);
    }

    let bot = Arc::new(Bot::new(config, source.clone())?);
    install_handlers(&bot);
    let restored = bot.load_saved_handlers()?;
    if restored > 0 {
        tracing::info!("📂 Restored {restored} saved handlers");
    }

    let handle = bot.spawn()?;
    let mut poller = tokio::task::spawn_blocking(move || handle.join());

    let drained = {
        let bot = bot.clone();
        async move {
            if !once {
                return std::future::pending::<()>().await;
            }
            loop {
                let idle = bot
                    .poller()
                    .pool_stats()
                    .is_none_or(|s| s.queued == 0 && s.completed + s.failed == s.submitted);
                if source.is_drained() && idle {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    };

    tokio::select! {
        joined = &mut poller => return finish(&bot, joined),
        _ = tokio::signal::ctrl_c() => tracing::info!("🛑 Ctrl-C received, shutting down..."),
        _ = drained => tracing::info!("📭 Every update handled"),
    }

    bot.stop();
    let joined = poller.await;
    finish(&bot, joined)
}

fn finish(
    bot: &Bot,
    joined: std::result::Result<std::thread::Result<botloop_core::Result<()>>, tokio::task::JoinError>,
) -> Result<()> {
    bot.save_handlers()?;
    match joined {
        Ok(Ok(outcome)) => Ok(outcome?),
        Ok(Err(_)) => anyhow::bail!("poller thread panicked"),
        Err(e) => anyhow::bail!("poller task failed: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "botloop=debug,botloop_poller=debug,botloop_dispatch=debug,botloop_workers=debug"
    } else {
        "botloop=info,botloop_poller=info,botloop_dispatch=info,botloop_workers=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run { updates, once } => run(config, &updates, once).await,
        Command::CheckConfig => {
            println!("✅ Config OK\n");
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
