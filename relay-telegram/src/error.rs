//! Transport errors, distinguished from `relay_core::RelayError` (see that
//! type's doc comment) so the orchestrator can tell "Telegram call failed"
//! apart from "the bridge's own logic failed".

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error(transparent)]
    Request(#[from] teloxide::RequestError),

    #[error("outbox op was dropped before it ran")]
    OpDropped,
}
