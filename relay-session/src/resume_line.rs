//! Resume-line parsing (spec.md §4.3), grounded on
//! `original_source/src/takopi/runner.py`'s `ResumeTokenMixin` and
//! `AliasRunner`.

use regex::Regex;

use relay_core::{EngineId, ResumeToken};

/// Recognizes and extracts one engine's resume-line syntax from free-form
/// user text, e.g. `` `codex resume <uuid>` ``.
pub trait ResumeSyntax: Send + Sync {
    fn engine(&self) -> &EngineId;

    /// Renders the canonical resume line for inclusion in a final message.
    fn format_resume(&self, token: &ResumeToken) -> String;

    /// True iff `line` (already trimmed of surrounding whitespace by the
    /// caller, matched from the start) is a resume line for this engine.
    fn is_resume_line(&self, line: &str) -> bool;

    /// Returns the **last** matching token in `text`, so a user replying
    /// with new directives can still override an earlier quoted one.
    fn extract_resume(&self, text: &str) -> Option<ResumeToken>;
}

/// A resume syntax built directly from a command name and a verb, e.g.
/// engine=`codex`, verb=`resume` → `` `codex resume <token>` ``, or
/// engine=`claude`, verb=`--resume|-r` for flag-style resumes.
pub struct RegexResumeSyntax {
    engine: EngineId,
    re: Regex,
    render: Box<dyn Fn(&str) -> String + Send + Sync>,
}

impl RegexResumeSyntax {
    /// `re` must contain a named capture group `token`. `render` formats
    /// the canonical resume line body for a given token value (without the
    /// engine name — see [`RegexResumeSyntax::command`] for the common
    /// case).
    pub fn new(
        engine: impl Into<EngineId>,
        re: Regex,
        render: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            engine: engine.into(),
            re,
            render: Box::new(render),
        }
    }

    /// Convenience constructor for the common `` `<engine> <verb> <token>` ``
    /// shape, case-insensitive, optional surrounding backticks.
    pub fn command(engine: impl Into<EngineId>, verb: &str) -> Self {
        let engine = engine.into();
        let pattern = format!(
            r"(?im)^\s*`?{}\s+{}\s+(?P<token>[^`\s]+)`?\s*$",
            regex::escape(engine.as_str()),
            verb
        );
        let re = Regex::new(&pattern).expect("static resume regex is valid");
        let engine_name = engine.as_str().to_string();
        let verb = verb.to_string();
        Self::new(engine, re, move |token| {
            format!("`{engine_name} {verb} {token}`")
        })
    }

    pub fn regex(&self) -> &Regex {
        &self.re
    }
}

impl ResumeSyntax for RegexResumeSyntax {
    fn engine(&self) -> &EngineId {
        &self.engine
    }

    fn format_resume(&self, token: &ResumeToken) -> String {
        assert_eq!(&token.engine, &self.engine, "resume token is for a different engine");
        (self.render)(&token.value)
    }

    fn is_resume_line(&self, line: &str) -> bool {
        self.re.is_match(line)
    }

    fn extract_resume(&self, text: &str) -> Option<ResumeToken> {
        let mut found = None;
        for caps in self.re.captures_iter(text) {
            if let Some(m) = caps.name("token") {
                found = Some(m.as_str().to_string());
            }
        }
        found.map(|value| ResumeToken::new(self.engine.clone(), value))
    }
}

/// Wraps a base [`ResumeSyntax`] under a different engine name, rewriting
/// the regex and the rendered command to use the alias instead of the base
/// engine — mirrors `runner.py`'s `AliasRunner`/`_derive_resume_regex`.
pub struct AliasResumeSyntax {
    engine: EngineId,
    base_engine: EngineId,
    re: Regex,
}

impl AliasResumeSyntax {
    pub fn new(alias: impl Into<EngineId>, base: &RegexResumeSyntax) -> Self {
        let alias = alias.into();
        let pattern = base
            .regex()
            .as_str()
            .replace(&regex::escape(base.engine().as_str()), &regex::escape(alias.as_str()));
        let re = Regex::new(&pattern).expect("alias resume regex derivation is valid");
        Self {
            engine: alias,
            base_engine: base.engine().clone(),
            re,
        }
    }
}

impl ResumeSyntax for AliasResumeSyntax {
    fn engine(&self) -> &EngineId {
        &self.engine
    }

    fn format_resume(&self, token: &ResumeToken) -> String {
        assert_eq!(&token.engine, &self.engine, "resume token is for a different engine");
        // Swap just the leading command token, preserving everything else
        // (backticks, verb, value) the base engine rendered.
        let base_token = ResumeToken::new(self.base_engine.clone(), token.value.clone());
        swap_resume_command(&format!("`{} resume {}`", self.base_engine, base_token.value), &self.base_engine, &self.engine)
    }

    fn is_resume_line(&self, line: &str) -> bool {
        self.re.is_match(line)
    }

    fn extract_resume(&self, text: &str) -> Option<ResumeToken> {
        let mut found = None;
        for caps in self.re.captures_iter(text) {
            if let Some(m) = caps.name("token") {
                found = Some(m.as_str().to_string());
            }
        }
        found.map(|value| ResumeToken::new(self.engine.clone(), value))
    }
}

fn swap_resume_command(line: &str, base: &EngineId, alias: &EngineId) -> String {
    line.replacen(base.as_str(), alias.as_str(), 1)
}

/// True iff `line` is a resume line for *any* of the given syntaxes. Used by
/// the orchestrator to strip resume lines out of the prompt before
/// forwarding it to the agent (spec.md §4.3).
pub fn is_any_resume_line(line: &str, syntaxes: &[&dyn ResumeSyntax]) -> bool {
    syntaxes.iter().any(|s| s.is_resume_line(line))
}

/// Strips every resume line from `text` (spec.md §4.8 step 3). Idempotent:
/// running it twice yields the same result (spec.md §8 round-trip laws).
pub fn strip_resume_lines(text: &str, syntaxes: &[&dyn ResumeSyntax]) -> String {
    text.lines()
        .filter(|line| !is_any_resume_line(line.trim(), syntaxes))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_last_of_two_resume_lines() {
        let syntax = RegexResumeSyntax::command("codex", "resume");
        let text = "please continue `codex resume 0000` and also `codex resume 019b66fc-64c2-7a71-81cd-081c504cfeb2`";
        let token = syntax.extract_resume(text).unwrap();
        assert_eq!(token.value, "019b66fc-64c2-7a71-81cd-081c504cfeb2");
    }

    #[test]
    fn format_then_extract_round_trips() {
        let syntax = RegexResumeSyntax::command("codex", "resume");
        let token = ResumeToken::new("codex", "abc-123");
        let line = syntax.format_resume(&token);
        assert_eq!(syntax.extract_resume(&line), Some(token));
    }

    #[test]
    fn claude_flag_style_resume() {
        let syntax = RegexResumeSyntax::new(
            "claude",
            Regex::new(r"(?im)^\s*`?claude\s+(?:--resume|-r)\s+(?P<token>[^`\s]+)`?\s*$").unwrap(),
            |token| format!("`claude --resume {token}`"),
        );
        assert!(syntax.is_resume_line("claude -r abc123"));
        let token = syntax.extract_resume("`claude --resume abc123`").unwrap();
        assert_eq!(token.value, "abc123");
    }

    #[test]
    fn strip_resume_lines_is_idempotent() {
        let syntax = RegexResumeSyntax::command("codex", "resume");
        let syntaxes: Vec<&dyn ResumeSyntax> = vec![&syntax];
        let text = "hello\n`codex resume abc`\nworld";
        let once = strip_resume_lines(text, &syntaxes);
        let twice = strip_resume_lines(&once, &syntaxes);
        assert_eq!(once, twice);
        assert_eq!(once, "hello\nworld");
    }

    #[test]
    fn alias_resume_syntax_parses_and_extracts() {
        let base = RegexResumeSyntax::command("codex", "resume");
        let alias = AliasResumeSyntax::new("mycodex", &base);
        assert!(alias.is_resume_line("`mycodex resume abc-123`"));
        let token = alias.extract_resume("`mycodex resume abc-123`").unwrap();
        assert_eq!(token.engine, EngineId::new("mycodex"));
        assert_eq!(token.value, "abc-123");
    }
}
