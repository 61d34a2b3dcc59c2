//! Pure markdown rendering of a [`ProgressSnapshot`] into the text shown in
//! the live progress message, grounded on
//! `original_source/src/takopi/exec_render.py`'s `ExecProgressRenderer`
//! (status glyphs, header format, hard-break joining) adapted to render off
//! the neutral `ActionState` list instead of raw per-engine JSON lines.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use relay_core::{ActionKind, Phase};

use crate::tracker::{ActionState, ProgressSnapshot};

const STATUS_RUNNING: &str = "▸";
const STATUS_DONE: &str = "✓";
const STATUS_FAIL: &str = "✗";
const HEADER_SEP: &str = " · ";
const HARD_BREAK: &str = "  \n";
const TRUNCATION_SEP: &str = "\n…\n";

const MAX_TITLE_LEN: usize = 300;

fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b").expect("static regex is valid")
    })
}

/// Truncates a rendered message to fit `limit` characters, keeping the
/// trailing `resume: <token>` line intact if the body ends with one
/// (otherwise keeping the last non-empty line). Mirrors the round-trip
/// law that a 10,000-character body ending in a resume line still ends
/// with that resume line after truncation.
pub fn truncate_preserving_resume_line(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    if limit == 0 {
        return String::new();
    }

    let lines: Vec<&str> = text.lines().collect();
    let mut tail_lines: Option<&[&str]> = None;
    let mut is_resume_tail = false;
    for i in (0..lines.len()).rev() {
        if lines[i].to_lowercase().contains("resume") && uuid_regex().is_match(lines[i]) {
            tail_lines = Some(&lines[i..]);
            is_resume_tail = true;
            break;
        }
    }
    if tail_lines.is_none() {
        for i in (0..lines.len()).rev() {
            if !lines[i].trim().is_empty() {
                tail_lines = Some(&lines[i..=i]);
                break;
            }
        }
    }

    let tail = tail_lines.unwrap_or(&[]).join("\n");
    let tail = tail.trim_matches('\n');

    let max_tail_chars = if is_resume_tail { limit } else { limit / 4 };
    let tail: String = if max_tail_chars == 0 {
        String::new()
    } else {
        take_last_chars(tail, max_tail_chars)
    };

    let sep_len = TRUNCATION_SEP.chars().count();
    let tail_len = tail.chars().count();
    if limit <= sep_len + tail_len {
        return if tail.is_empty() { take_first_chars(text, limit) } else { take_last_chars(&tail, limit) };
    }

    let head_budget = limit - sep_len - tail_len;
    let head = take_first_chars(text, head_budget);
    let head = head.trim_end();
    take_first_chars(&format!("{head}{TRUNCATION_SEP}{tail}"), limit)
}

fn take_first_chars(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

fn take_last_chars(text: &str, n: usize) -> String {
    let total = text.chars().count();
    if total <= n {
        return text.to_string();
    }
    text.chars().skip(total - n).collect()
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (minutes, seconds) = (total / 60, total % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

fn format_header(elapsed: Duration, step: Option<usize>, label: &str) -> String {
    let mut parts = vec![label.to_string(), format_elapsed(elapsed)];
    if let Some(step) = step {
        parts.push(format!("step {step}"));
    }
    parts.join(HEADER_SEP)
}

fn shorten(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let truncated: String = text.chars().take(width.saturating_sub(1)).collect();
    format!("{}…", truncated.trim_end())
}

fn action_line(state: &ActionState) -> Option<String> {
    let title = shorten(&state.action.title, MAX_TITLE_LEN);
    match (state.action.kind, state.display_phase) {
        (ActionKind::Command, Phase::Started | Phase::Updated) => Some(format!("{STATUS_RUNNING} `{title}`")),
        (ActionKind::Command, Phase::Completed) => {
            let status = if state.ok.unwrap_or(true) { STATUS_DONE } else { STATUS_FAIL };
            Some(format!("{status} `{title}`"))
        }
        (ActionKind::Tool, Phase::Started | Phase::Updated) => Some(format!("{STATUS_RUNNING} tool: {title}")),
        (ActionKind::Tool, Phase::Completed) => {
            let status = if state.ok.unwrap_or(true) { STATUS_DONE } else { STATUS_FAIL };
            Some(format!("{status} tool: {title}"))
        }
        (ActionKind::WebSearch, Phase::Started | Phase::Updated) => Some(format!("{STATUS_RUNNING} searching: {title}")),
        (ActionKind::WebSearch, Phase::Completed) => Some(format!("{STATUS_DONE} searched: {title}")),
        (ActionKind::FileChange, Phase::Completed) => Some(format!("{STATUS_DONE} {title}")),
        (ActionKind::FileChange, _) => Some(format!("{STATUS_RUNNING} {title}")),
        (ActionKind::Subagent, Phase::Started | Phase::Updated) => Some(format!("{STATUS_RUNNING} subagent: {title}")),
        (ActionKind::Subagent, Phase::Completed) => Some(format!("{STATUS_DONE} subagent: {title}")),
        (ActionKind::Note, _) => Some(title),
        (ActionKind::Warning, _) => Some(format!("{STATUS_FAIL} {title}")),
        (ActionKind::Turn, _) => None,
    }
}

fn assemble(header: &str, lines: &[String], context_line: Option<&str>, resume_line: Option<&str>) -> String {
    let mut sections = vec![header.to_string()];
    if !lines.is_empty() {
        sections.push(lines.join(HARD_BREAK));
    }
    if let Some(context) = context_line {
        sections.push(context.to_string());
    }
    if let Some(resume) = resume_line {
        sections.push(resume.to_string());
    }
    sections.join("\n\n")
}

/// Renders the in-progress view: header with elapsed time + step count,
/// followed by the visible action list.
pub fn render_progress(snapshot: &ProgressSnapshot, elapsed: Duration) -> String {
    let step = if snapshot.action_count > 0 { Some(snapshot.action_count as usize) } else { None };
    let header = format_header(elapsed, step, "working");
    let lines: Vec<String> = snapshot.actions.iter().filter_map(action_line).collect();
    assemble(&header, &lines, snapshot.context_line.as_deref(), snapshot.resume_line.as_deref())
}

/// Renders the terminal view after a run finishes, errors, or is
/// cancelled (spec.md §4.8 step 6).
pub fn render_final(snapshot: &ProgressSnapshot, elapsed: Duration, status: &str, answer: &str) -> String {
    let header = format_header(elapsed, None, status);
    let answer = answer.trim();
    let mut sections = vec![header];
    if !answer.is_empty() {
        sections.push(answer.to_string());
    }
    if let Some(resume) = &snapshot.resume_line {
        sections.push(resume.clone());
    }
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::ProgressTracker;
    use relay_core::{Action, ActionKind, Event, EngineId};

    #[test]
    fn format_elapsed_buckets_by_hour_minute_second() {
        assert_eq!(format_elapsed(Duration::from_secs(5)), "5s");
        assert_eq!(format_elapsed(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_elapsed(Duration::from_secs(3661)), "1h 01m");
    }

    #[test]
    fn render_progress_shows_running_and_done_commands() {
        let mut tracker = ProgressTracker::new("codex");
        tracker.note_event(&Event::Action {
            engine: EngineId::new("codex"),
            action: Action::new("a1", ActionKind::Command, "ls -la"),
            phase: relay_core::Phase::Started,
            ok: None,
            message: None,
            level: None,
        });
        let snapshot = tracker.snapshot(None, None);
        let text = render_progress(&snapshot, Duration::from_secs(3));
        assert!(text.contains("working"));
        assert!(text.contains("ls -la"));
        assert!(text.contains(STATUS_RUNNING));
    }

    #[test]
    fn truncate_preserving_resume_line_keeps_trailing_resume_line() {
        let uuid = "019b66fc-64c2-7a71-81cd-081c504cfeb2";
        let body = format!("{}\nresume: `{uuid}`", "x".repeat(10_000));

        let out = truncate_preserving_resume_line(&body, 400);

        assert!(out.chars().count() <= 400);
        assert!(out.contains(uuid));
        assert!(out.trim_end().ends_with(&format!("resume: `{uuid}`")));
    }

    #[test]
    fn truncate_preserving_resume_line_is_a_no_op_under_the_limit() {
        let body = "short body";
        assert_eq!(truncate_preserving_resume_line(body, 400), body);
    }

    #[test]
    fn render_final_includes_answer_and_resume_line() {
        let tracker = ProgressTracker::new("codex");
        let snapshot = tracker.snapshot(None, Some("`codex resume abc`".to_string()));
        let text = render_final(&snapshot, Duration::from_secs(10), "done", "the answer");
        assert!(text.starts_with("done"));
        assert!(text.contains("the answer"));
        assert!(text.contains("codex resume abc"));
    }
}
