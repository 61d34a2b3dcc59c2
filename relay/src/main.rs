//! Binary entry point: loads config, wires the engines/outbox/orchestrator,
//! and runs the long-poll loop until a shutdown signal (spec.md §6). Follows
//! `telegram-bot/src/main.rs`'s `dotenvy` + `clap` + `match Commands` shape.

mod app;
mod logging;
mod wiring;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use teloxide::Bot;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use relay_config::{Cli, Commands, RelayConfig};
use relay_orchestrator::{Orchestrator, OrchestratorConfig, SchedulerBridge};
use relay_outbox::Outbox;
use relay_session::{SessionLockRegistry, ThreadScheduler};
use relay_state::{ChatSessionStore, TopicStateStore};
use relay_telegram::daemon::{install_shutdown_handlers, run_poll_loop};
use relay_telegram::TelegramClient;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let Commands::Run { token } = cli.command;

    match run(token).await {
        Ok(()) => ExitCode::from(130),
        Err(err) => {
            eprintln!("relay: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(token: Option<String>) -> anyhow::Result<()> {
    let config = RelayConfig::load(token).map_err(|err| anyhow::anyhow!(err))?;
    config.validate().map_err(|err| anyhow::anyhow!(err))?;

    logging::init_tracing(&config.log_file)?;
    info!("relay.starting");

    let mut bot = Bot::new(config.bot_token.clone());
    if let Some(api_url) = &config.api_base_url {
        bot = bot.set_api_url(url::Url::parse(api_url)?);
    }

    let outbox = Arc::new(Outbox::new());
    let client = Arc::new(TelegramClient::new(bot.clone(), outbox));

    let engines = Arc::new(wiring::build_engines(&config.engines, &config.default_engine));
    let resume_syntaxes = Arc::new(wiring::build_resume_syntaxes(&config.engines));
    let locks = Arc::new(SessionLockRegistry::new());

    let orchestrator_config = OrchestratorConfig {
        debounce: config.edit_interval,
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(
        client.clone(),
        engines,
        locks,
        (*resume_syntaxes).clone(),
        orchestrator_config,
    );

    let bridge = SchedulerBridge::new(&orchestrator);
    let scheduler = ThreadScheduler::new(bridge);
    orchestrator.attach_scheduler(scheduler);

    let chat_sessions = Arc::new(ChatSessionStore::new(&config.chat_session_state_path));
    let topics = Arc::new(TopicStateStore::new(&config.topic_state_path));

    let cancel = CancellationToken::new();
    install_shutdown_handlers(cancel.clone());

    let (tx, rx) = mpsc::channel(256);
    let poll_handle = tokio::spawn(run_poll_loop(bot, None, tx, cancel.clone()));

    app::run_dispatch_loop(
        orchestrator,
        client.clone(),
        chat_sessions,
        topics,
        resume_syntaxes,
        config.default_engine,
        rx,
        cancel,
    )
    .await;

    let _ = poll_handle.await;
    client.close().await;
    info!("relay.stopped");
    Ok(())
}
