use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::EngineId;
use crate::resume::ResumeToken;

/// What kind of thing an [`Action`] represents. Inferred by each translator
/// from engine-specific tool/item names (see `relay-runner`'s per-engine
/// `kind_for` helpers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Command,
    Tool,
    FileChange,
    WebSearch,
    Subagent,
    Note,
    Warning,
    /// Bookkeeping only; must never appear in a rendered action list
    /// (spec.md §4.5).
    Turn,
}

/// Lifecycle phase of one logical action. `id` is stable across
/// started → updated → completed for a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Started,
    Updated,
    Completed,
}

/// Severity attached to an `Action` event, used by completed-only
/// synthesized notes (decode errors, translator errors, process failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Warning,
}

/// One action within a run: a shell command, a file edit, a tool call, etc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub kind: ActionKind,
    pub title: String,
    #[serde(default)]
    pub detail: serde_json::Map<String, Value>,
}

impl Action {
    pub fn new(id: impl Into<String>, kind: ActionKind, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            detail: serde_json::Map::new(),
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Map<String, Value>) -> Self {
        self.detail = detail;
        self
    }
}

/// Token/cost accounting reported by a completed run. Shape varies by
/// engine, so unknown fields are kept in `extra` rather than dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Engine-neutral event produced by the translator layer (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    Started {
        engine: EngineId,
        resume: ResumeToken,
        title: String,
        #[serde(default)]
        meta: Option<Value>,
    },
    Action {
        engine: EngineId,
        action: Action,
        phase: Phase,
        #[serde(default)]
        ok: Option<bool>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        level: Option<Level>,
    },
    Completed {
        engine: EngineId,
        ok: bool,
        answer: String,
        #[serde(default)]
        resume: Option<ResumeToken>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        usage: Option<Usage>,
    },
}

impl Event {
    pub fn engine(&self) -> &EngineId {
        match self {
            Event::Started { engine, .. } => engine,
            Event::Action { engine, .. } => engine,
            Event::Completed { engine, .. } => engine,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Event::Completed { .. })
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Event::Started { .. })
    }

    /// Builds a completed-only warning note, used by the runner harness to
    /// synthesize errors (malformed JSON, translator panics, non-zero exit)
    /// without requiring a preceding started/updated event. Tolerated by
    /// every consumer per spec.md §3's stream invariants.
    pub fn warning_note(engine: EngineId, id: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Event::Action {
            engine,
            action: Action::new(id, ActionKind::Warning, message.clone()),
            phase: Phase::Completed,
            ok: Some(false),
            message: Some(message),
            level: Some(Level::Warning),
        }
    }
}
