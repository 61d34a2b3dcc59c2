//! Builds the `EngineRegistry` and the per-engine resume-line syntaxes
//! from loaded config (spec.md §3, §6), grounded on
//! `original_source/src/takopi/runner_bridge.py`'s `build_runners`.

use std::collections::HashMap;
use std::sync::Arc;

use relay_core::EngineId;
use relay_orchestrator::{EngineRegistry, EngineRunner};
use relay_runner::{ClaudeTranslator, CodexTranslator, OpenCodeTranslator, PiTranslator, SubprocessRunner};
use relay_session::{RegexResumeSyntax, ResumeSyntax};

use relay_config::EngineSettings;

pub fn build_engines(settings: &EngineSettings, fallback: &EngineId) -> EngineRegistry {
    let mut registry = EngineRegistry::new(fallback.clone());

    if let Some(codex) = &settings.codex {
        let translator = Arc::new(CodexTranslator::new(
            codex.command.clone(),
            codex.extra_args.clone(),
            codex.title.clone(),
        ));
        let runner: Arc<dyn EngineRunner> = Arc::new(SubprocessRunner::new(translator, None));
        registry.register(runner);
    }

    if let Some(cmd) = &settings.claude_cmd {
        let translator = Arc::new(ClaudeTranslator::new(cmd.clone(), settings.claude_model.clone()));
        let runner: Arc<dyn EngineRunner> = Arc::new(SubprocessRunner::new(translator, None));
        registry.register(runner);
    }

    if let Some(cmd) = &settings.opencode_cmd {
        let translator = Arc::new(OpenCodeTranslator::new(cmd.clone(), settings.opencode_model.clone()));
        let runner: Arc<dyn EngineRunner> = Arc::new(SubprocessRunner::new(translator, None));
        registry.register(runner);
    }

    if let Some(pi) = &settings.pi {
        let translator = Arc::new(PiTranslator::new(pi.extra_args.clone(), pi.model.clone(), pi.provider.clone()));
        let runner: Arc<dyn EngineRunner> = Arc::new(SubprocessRunner::new(translator, None));
        registry.register(runner);
    }

    registry
}

/// One resume-line syntax per configured engine, keyed for
/// `Orchestrator::new`. Each engine's regex mirrors its translator's own
/// `resume_regex()` (kept in sync by hand — see `DESIGN.md`).
pub fn build_resume_syntaxes(settings: &EngineSettings) -> HashMap<EngineId, Arc<dyn ResumeSyntax>> {
    let mut map: HashMap<EngineId, Arc<dyn ResumeSyntax>> = HashMap::new();

    if settings.codex.is_some() {
        map.insert(EngineId::new("codex"), Arc::new(RegexResumeSyntax::command("codex", "resume")));
    }
    if settings.claude_cmd.is_some() {
        let syntax = RegexResumeSyntax::new(
            "claude",
            CodexClaudeResumeRegex::claude(),
            |token| format!("`claude --resume {token}`"),
        );
        map.insert(EngineId::new("claude"), Arc::new(syntax));
    }
    if settings.opencode_cmd.is_some() {
        let syntax = RegexResumeSyntax::new(
            "opencode",
            CodexClaudeResumeRegex::opencode(),
            |token| format!("`opencode run --session {token}`"),
        );
        map.insert(EngineId::new("opencode"), Arc::new(syntax));
    }
    if settings.pi.is_some() {
        let syntax = RegexResumeSyntax::new("pi", CodexClaudeResumeRegex::pi(), |token| format!("`pi --session {token}`"));
        map.insert(EngineId::new("pi"), Arc::new(syntax));
    }

    map
}

/// Mirrors each engine's own `resume_regex()` without depending on
/// `relay-runner`'s per-translator private regex constructors.
struct CodexClaudeResumeRegex;

impl CodexClaudeResumeRegex {
    fn claude() -> regex::Regex {
        regex::Regex::new(r"(?im)^\s*`?claude\s+(?:--resume|-r)\s+(?P<token>[^`\s]+)`?\s*$").unwrap()
    }

    fn opencode() -> regex::Regex {
        regex::Regex::new(r"(?im)^\s*`?opencode(?:\s+run)?\s+(?:--session|-s)\s+(?P<token>ses_[A-Za-z0-9]+)`?\s*$").unwrap()
    }

    fn pi() -> regex::Regex {
        regex::Regex::new(r#"(?im)^\s*`?pi\s+--session\s+(?P<token>.+?)`?\s*$"#).unwrap()
    }
}
