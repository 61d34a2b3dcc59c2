//! Subprocess harness and per-engine translators (spec.md §3, §4.2).
//!
//! [`SubprocessRunner`] drives one engine invocation end to end; each
//! engine under [`engines`] supplies a [`Translator`] that turns that
//! engine's newline-delimited JSON protocol into neutral [`relay_core::Event`]s.

pub mod alias;
pub mod engines;
pub mod process;
pub mod runner;
pub mod translator;

pub use alias::AliasTranslator;
pub use engines::claude::ClaudeTranslator;
pub use engines::codex::CodexTranslator;
pub use engines::opencode::OpenCodeTranslator;
pub use engines::pi::PiTranslator;
pub use process::ManagedProcess;
pub use runner::SubprocessRunner;
pub use translator::{JsonlRunState, Translator};
