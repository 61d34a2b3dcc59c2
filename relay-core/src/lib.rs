//! Engine-neutral data model shared by every other `relay-*` crate:
//! events, actions, resume tokens, run context, and the crate-wide error
//! type. Transport-agnostic — nothing here knows about Telegram or any
//! particular agent CLI.

pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod message_ref;
pub mod resume;

pub use context::{ProjectsConfig, RunContext};
pub use engine::EngineId;
pub use error::{RelayError, Result};
pub use event::{Action, ActionKind, Event, Level, Phase, Usage};
pub use message_ref::MessageRef;
pub use resume::ResumeToken;
