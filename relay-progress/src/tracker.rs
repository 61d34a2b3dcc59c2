//! Live action bookkeeping for one run (spec.md §4.5), grounded on
//! `original_source/src/takopi/progress.py`'s `ProgressTracker`.

use std::collections::HashMap;

use relay_core::{Action, ActionKind, Event, Phase, ResumeToken};

/// A single action's latest known state, plus enough bookkeeping to sort
/// and re-render the visible list deterministically.
#[derive(Debug, Clone)]
pub struct ActionState {
    pub action: Action,
    pub phase: Phase,
    pub ok: Option<bool>,
    /// `phase`, except a `started` event for an action already open is
    /// folded into `Updated` so the renderer doesn't flicker back to
    /// "running" for something it already showed as in-progress.
    pub display_phase: Phase,
    pub completed: bool,
    pub first_seen_seq: u64,
    pub last_update_seq: u64,
}

/// Everything the renderer needs for one frame (spec.md §4.5's `snapshot`).
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub engine: String,
    pub action_count: u64,
    pub actions: Vec<ActionState>,
    pub resume: Option<ResumeToken>,
    pub resume_line: Option<String>,
    pub context_line: Option<String>,
}

/// Owns the ordered action list for one run. `note_event` is the only
/// mutator; it reports whether the visible state actually changed so
/// callers (the coalescer) can skip redundant re-renders.
pub struct ProgressTracker {
    engine: String,
    resume: Option<ResumeToken>,
    action_count: u64,
    actions: HashMap<String, ActionState>,
    seq: u64,
}

impl ProgressTracker {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            resume: None,
            action_count: 0,
            actions: HashMap::new(),
            seq: 0,
        }
    }

    pub fn resume(&self) -> Option<&ResumeToken> {
        self.resume.as_ref()
    }

    pub fn set_resume(&mut self, resume: Option<ResumeToken>) {
        if let Some(resume) = resume {
            self.resume = Some(resume);
        }
    }

    /// Folds one translated event into the tracker's state. Returns `true`
    /// iff the event changed anything an observer would render (spec.md
    /// §4.5): a new action, an updated title/phase, or a completion.
    pub fn note_event(&mut self, event: &Event) -> bool {
        match event {
            Event::Started { resume, .. } => {
                self.resume = Some(resume.clone());
                true
            }
            Event::Action { action, phase, ok, .. } => self.note_action(action, *phase, *ok),
            Event::Completed { .. } => false,
        }
    }

    fn note_action(&mut self, action: &Action, phase: Phase, ok: Option<bool>) -> bool {
        if action.kind == ActionKind::Turn {
            return false;
        }
        if action.id.is_empty() {
            return false;
        }

        let completed = phase == Phase::Completed;
        let existing = self.actions.get(&action.id);
        let has_open = existing.map(|e| !e.completed).unwrap_or(false);
        let is_update = phase == Phase::Updated || (phase == Phase::Started && has_open);
        let display_phase = if is_update && !completed { Phase::Updated } else { phase };

        self.seq += 1;
        let seq = self.seq;

        let first_seen_seq = match existing {
            Some(existing) => existing.first_seen_seq,
            None => {
                self.action_count += 1;
                seq
            }
        };

        self.actions.insert(
            action.id.clone(),
            ActionState {
                action: action.clone(),
                phase,
                ok,
                display_phase,
                completed,
                first_seen_seq,
                last_update_seq: seq,
            },
        );
        true
    }

    pub fn snapshot(&self, context_line: Option<String>, resume_line: Option<String>) -> ProgressSnapshot {
        let mut actions: Vec<ActionState> = self.actions.values().cloned().collect();
        actions.sort_by_key(|a| a.first_seen_seq);
        ProgressSnapshot {
            engine: self.engine.clone(),
            action_count: self.action_count,
            actions,
            resume: self.resume.clone(),
            resume_line,
            context_line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::EngineId;

    fn action_event(id: &str, phase: Phase, ok: Option<bool>) -> Event {
        Event::Action {
            engine: EngineId::new("codex"),
            action: Action::new(id, ActionKind::Command, format!("cmd {id}")),
            phase,
            ok,
            message: None,
            level: None,
        }
    }

    #[test]
    fn started_then_completed_tracks_one_action() {
        let mut tracker = ProgressTracker::new("codex");
        assert!(tracker.note_event(&action_event("a1", Phase::Started, None)));
        assert!(tracker.note_event(&action_event("a1", Phase::Completed, Some(true))));
        let snapshot = tracker.snapshot(None, None);
        assert_eq!(snapshot.action_count, 1);
        assert_eq!(snapshot.actions.len(), 1);
        assert!(snapshot.actions[0].completed);
    }

    #[test]
    fn turn_actions_never_appear() {
        let mut tracker = ProgressTracker::new("codex");
        let evt = Event::Action {
            engine: EngineId::new("codex"),
            action: Action::new("turn_0", ActionKind::Turn, "turn started"),
            phase: Phase::Started,
            ok: None,
            message: None,
            level: None,
        };
        assert!(!tracker.note_event(&evt));
        assert_eq!(tracker.snapshot(None, None).action_count, 0);
    }

    #[test]
    fn reopened_start_folds_into_update() {
        let mut tracker = ProgressTracker::new("codex");
        tracker.note_event(&action_event("a1", Phase::Started, None));
        tracker.note_event(&action_event("a1", Phase::Started, None));
        let snapshot = tracker.snapshot(None, None);
        assert_eq!(snapshot.action_count, 1);
        assert_eq!(snapshot.actions[0].display_phase, Phase::Updated);
    }

    #[test]
    fn actions_are_sorted_by_first_seen() {
        let mut tracker = ProgressTracker::new("codex");
        tracker.note_event(&action_event("second", Phase::Started, None));
        tracker.note_event(&action_event("first", Phase::Started, None));
        tracker.note_event(&action_event("second", Phase::Updated, None));
        let snapshot = tracker.snapshot(None, None);
        let ids: Vec<&str> = snapshot.actions.iter().map(|a| a.action.id.as_str()).collect();
        assert_eq!(ids, vec!["second", "first"]);
    }
}
