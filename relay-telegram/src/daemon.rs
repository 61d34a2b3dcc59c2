//! Long-poll loop against `getUpdates` (spec.md §5: `poll_updates` suspends
//! on the Telegram long-poll, `timeout_s=50`). Grounded on
//! `other_examples/…ralph-telegram/daemon.rs`'s `poll_updates`/shutdown-
//! signal shape, adapted to emit onto an mpsc channel instead of returning
//! a batch, and to use `CancellationToken` (this workspace's convention,
//! see `relay_runner::runner`) instead of a bare `AtomicBool`.

use teloxide::payloads::GetUpdatesSetters;
use teloxide::prelude::*;
use teloxide::types::AllowedUpdate;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::update::{parse_incoming_update, IncomingUpdate};

const POLL_TIMEOUT_SECS: u32 = 50;
const ERROR_BACKOFF_SECS: u64 = 2;

/// Registers `ctrl_c`/`SIGTERM` handlers that cancel `token` once, matching
/// the graceful-shutdown idiom used throughout this workspace.
pub fn install_shutdown_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });
    #[cfg(unix)]
    {
        let term_token = token;
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    term_token.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "daemon.sigterm_handler_failed");
                    term_token.cancel();
                }
            }
        });
    }
}

/// Runs the `getUpdates` long-poll loop until `cancel` fires, sending every
/// parsed update onto `tx`. `allowed_chat_ids = None` means every chat is
/// accepted (matching the original's default).
pub async fn run_poll_loop(
    bot: Bot,
    allowed_chat_ids: Option<Vec<i64>>,
    tx: mpsc::Sender<IncomingUpdate>,
    cancel: CancellationToken,
) {
    let mut offset: i32 = 0;
    while !cancel.is_cancelled() {
        let request = bot
            .get_updates()
            .offset(offset)
            .timeout(POLL_TIMEOUT_SECS)
            .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery]);

        let updates = tokio::select! {
            _ = cancel.cancelled() => break,
            result = request => result,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(err) => {
                warn!(error = %err, "daemon.get_updates_failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(ERROR_BACKOFF_SECS)) => {}
                }
                continue;
            }
        };

        for update in &updates {
            offset = update.id.0 as i32 + 1;
            debug!(update_id = update.id.0, "daemon.update");
            if let Some(parsed) = parse_incoming_update(update, allowed_chat_ids.as_deref()) {
                if tx.send(parsed).await.is_err() {
                    info!("daemon.receiver_dropped");
                    return;
                }
            }
        }
    }
    info!("daemon.poll_loop_stopped");
}
