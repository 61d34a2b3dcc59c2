//! Resolves a resume target for one incoming prompt (spec.md §6): the
//! per-engine backtick syntaxes (`relay_session::ResumeSyntax`) plus the
//! bare `resume: <uuid>` form, which names no engine and so binds to
//! whichever engine ends up handling the message. Grounded on
//! `original_source/src/takopi/runner_bridge.py`'s `_extract_resume`, which
//! checks both forms against the message text and the replied-to message.

use std::sync::OnceLock;

use regex::Regex;

use relay_core::{EngineId, ResumeToken};
use relay_session::{strip_resume_lines, ResumeSyntax};

fn generic_resume_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*resume:\s*(?P<token>\S+)\s*$").expect("static regex is valid"))
}

/// Returns the last bare `resume: <value>` line in `text`, if any — mirrors
/// [`relay_session::ResumeSyntax::extract_resume`]'s "last wins" rule so a
/// later correction in the same message overrides an earlier one.
pub fn extract_generic_resume(text: &str) -> Option<String> {
    let mut found = None;
    for caps in generic_resume_regex().captures_iter(text) {
        if let Some(m) = caps.name("token") {
            found = Some(m.as_str().to_string());
        }
    }
    found
}

fn is_generic_resume_line(line: &str) -> bool {
    generic_resume_regex().is_match(line.trim())
}

/// Resolves a resume token for one incoming prompt: checks the per-engine
/// syntaxes first (most specific), then the bare `resume: <uuid>` form
/// bound to `engine`. Looks at `text`, then — only if nothing is found
/// there — the replied-to message's text (spec.md §6).
pub fn resolve_resume(
    text: &str,
    reply_text: Option<&str>,
    engine: &EngineId,
    syntaxes: &[&dyn ResumeSyntax],
) -> Option<ResumeToken> {
    for candidate in [Some(text), reply_text].into_iter().flatten() {
        if let Some(token) = syntaxes.iter().find_map(|s| s.extract_resume(candidate)) {
            return Some(token);
        }
        if let Some(value) = extract_generic_resume(candidate) {
            return Some(ResumeToken::new(engine.clone(), value));
        }
    }
    None
}

/// Strips every resume line — engine-tagged or bare `resume:` — from
/// `text` before it's forwarded to the agent (spec.md §4.8 step 3).
pub fn strip_resume_and_engine_lines(text: &str, syntaxes: &[&dyn ResumeSyntax]) -> String {
    let stripped = strip_resume_lines(text, syntaxes);
    stripped
        .lines()
        .filter(|line| !is_generic_resume_line(line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_session::RegexResumeSyntax;

    #[test]
    fn generic_form_binds_to_current_engine() {
        let engine = EngineId::new("codex");
        let token = resolve_resume("resume: abc-123", None, &engine, &[]).unwrap();
        assert_eq!(token.engine, engine);
        assert_eq!(token.value, "abc-123");
    }

    #[test]
    fn per_engine_syntax_wins_over_generic_form() {
        let syntax = RegexResumeSyntax::command("codex", "resume");
        let engine = EngineId::new("codex");
        let text = "resume: wrong\n`codex resume right`";
        let token = resolve_resume(text, None, &engine, &[&syntax]).unwrap();
        assert_eq!(token.value, "right");
    }

    #[test]
    fn falls_back_to_replied_to_message() {
        let engine = EngineId::new("codex");
        let token = resolve_resume("continue please", Some("resume: from-reply"), &engine, &[]).unwrap();
        assert_eq!(token.value, "from-reply");
    }

    #[test]
    fn strip_removes_generic_resume_lines() {
        let stripped = strip_resume_and_engine_lines("hello\nresume: abc\nworld", &[]);
        assert_eq!(stripped, "hello\nworld");
    }
}
