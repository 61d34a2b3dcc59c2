//! Telegram Bot API transport: long-polling, update parsing, the outbox-
//! backed client, command/callback dispatch, and forum-topic bindings
//! (spec.md §6). Grounded on `dbot-telegram` for the teloxide wiring idiom
//! and on `original_source/src/takopi/telegram/*.py` for call-site
//! semantics.

pub mod client;
pub mod commands;
pub mod daemon;
pub mod error;
pub mod forum;
pub mod update;

pub use client::{SendOptions, SentMessage, TelegramClient};
pub use error::TelegramError;
pub use update::{IncomingCallbackQuery, IncomingMessage, IncomingUpdate};
