//! Per-engine translation seam (spec.md §3, §4.1), grounded on
//! `original_source/src/takopi/runner.py`'s `JsonlSubprocessRunner` base
//! methods (`note_event`, `invalid_json_events`, `decode_error_events`,
//! `translate_error_events`, `process_error_events`, `stream_end_events`).
//! Each engine module under `engines/` implements [`Translator`] and
//! inherits these defaults rather than re-deriving the bookkeeping.

use std::collections::HashMap;

use serde_json::Value;

use relay_core::{Action, ActionKind, EngineId, Event, Level, Phase, ResumeToken, Usage};

/// Per-run scratch state a translator carries between JSON lines. Fields
/// beyond `note_seq` are a union of what the four shipped engines need
/// (codex's turn bookkeeping, claude's pending tool-call pairing) — kept on
/// one struct rather than an associated type so `Translator` stays
/// object-safe for the alias/registry layer.
#[derive(Debug, Default)]
pub struct JsonlRunState {
    pub note_seq: u64,
    pub final_answer: Option<String>,
    pub turn_index: u64,
    pub pending_actions: HashMap<String, Action>,
    pub last_assistant_text: Option<String>,
    /// Set by [`Translator::new_state`] when the engine needs a resume
    /// token picked client-side before the subprocess even starts (pi
    /// generates its own session file path). `None` means the run's
    /// resume token, if any, is whatever the caller passed in.
    pub session: Option<ResumeToken>,
    /// Set once a `Started` event has been emitted for this run, for
    /// engines (opencode, pi) whose wire protocol doesn't have a single
    /// dedicated "session opened" message.
    pub session_started: bool,
    /// Latest usage/cost accounting seen so far (pi reports it per
    /// assistant message, ahead of the final `agent_end`).
    pub usage: Option<Usage>,
    /// Set when an engine reports a terminal error ahead of its actual
    /// completion event (pi's `message_end`/`agent_end` split).
    pub run_error: Option<String>,
}

impl JsonlRunState {
    pub fn next_note_id(&mut self, tag: &str) -> String {
        self.note_seq += 1;
        format!("{tag}.note.{}", self.note_seq)
    }
}

/// Decodes one engine's newline-delimited JSON protocol into neutral
/// [`Event`]s. Implementations are pure aside from the state they're handed;
/// all process/IO concerns live in [`crate::runner::SubprocessRunner`].
pub trait Translator: Send + Sync {
    fn engine(&self) -> &EngineId;
    fn command(&self) -> &str;

    fn tag(&self) -> &str {
        self.engine().as_str()
    }

    fn build_args(&self, prompt: &str, resume: Option<&ResumeToken>) -> Vec<String>;

    /// Bytes written to the child's stdin, or `None` to close stdin
    /// immediately without writing (claude passes the prompt as an argv
    /// element instead).
    fn stdin_payload(&self, prompt: &str, _resume: Option<&ResumeToken>) -> Option<Vec<u8>> {
        Some(prompt.as_bytes().to_vec())
    }

    fn env(&self) -> Option<Vec<(String, String)>> {
        None
    }

    /// Builds fresh per-run state. Most engines ignore `resume` here and
    /// let the runner pass it through to `build_args` unchanged; pi
    /// overrides this to mint a session path up front when `resume` is
    /// `None`, storing it on `state.session` so it becomes the effective
    /// resume for the rest of the run.
    fn new_state(&self, _resume: Option<&ResumeToken>) -> JsonlRunState {
        JsonlRunState::default()
    }

    /// Translates one decoded JSON line into zero or more neutral events.
    fn translate(
        &self,
        data: &Value,
        state: &mut JsonlRunState,
        resume: Option<&ResumeToken>,
        found_session: Option<&ResumeToken>,
    ) -> Vec<Event>;

    fn note_event(&self, state: &mut JsonlRunState, message: impl Into<String>, ok: bool) -> Event {
        let message = message.into();
        let id = state.next_note_id(self.tag());
        Event::Action {
            engine: self.engine().clone(),
            action: Action::new(id, ActionKind::Warning, message.clone()),
            phase: Phase::Completed,
            ok: Some(ok),
            message: Some(message),
            level: Some(if ok { Level::Info } else { Level::Warning }),
        }
    }

    fn invalid_json_events(&self, state: &mut JsonlRunState, line: &str) -> Vec<Event> {
        tracing::debug!(line, "jsonl.parse.invalid");
        vec![self.note_event(
            state,
            format!("invalid JSON from {}; ignoring line", self.tag()),
            false,
        )]
    }

    fn decode_error_events(&self, state: &mut JsonlRunState, line: &str, error: &str) -> Vec<Event> {
        tracing::debug!(line, error, "jsonl.decode.error");
        vec![self.note_event(
            state,
            format!("invalid event from {}; ignoring line", self.tag()),
            false,
        )]
    }

    fn translate_error_events(&self, state: &mut JsonlRunState, error: &str) -> Vec<Event> {
        tracing::debug!(error, "runner.translate.error");
        vec![self.note_event(
            state,
            format!("{} translation error; ignoring event", self.tag()),
            false,
        )]
    }

    fn process_error_events(
        &self,
        state: &mut JsonlRunState,
        rc: i32,
        resume: Option<&ResumeToken>,
        found_session: Option<&ResumeToken>,
    ) -> Vec<Event> {
        let message = format!("{} failed (rc={rc}).", self.tag());
        let resume_for_completed = found_session.or(resume).cloned();
        vec![
            self.note_event(state, message.clone(), false),
            Event::Completed {
                engine: self.engine().clone(),
                ok: false,
                answer: String::new(),
                resume: resume_for_completed,
                error: Some(message),
                usage: None,
            },
        ]
    }

    fn stream_end_events(
        &self,
        _state: &mut JsonlRunState,
        resume: Option<&ResumeToken>,
        found_session: Option<&ResumeToken>,
    ) -> Vec<Event> {
        let message = format!("{} finished without a result event", self.tag());
        let resume_for_completed = found_session.or(resume).cloned();
        vec![Event::Completed {
            engine: self.engine().clone(),
            ok: false,
            answer: String::new(),
            resume: resume_for_completed,
            error: Some(message),
            usage: None,
        }]
    }
}
