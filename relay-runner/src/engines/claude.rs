//! Claude Code CLI translator (`claude -p --output-format stream-json`),
//! grounded on `original_source/src/takopi/runners/claude.py`.

use regex::Regex;
use serde_json::Value;

use relay_core::{Action, ActionKind, EngineId, Event, Phase, ResumeToken, Usage};

use crate::translator::{JsonlRunState, Translator};
use crate::engines::codex::relativize_command;

const DEFAULT_ALLOWED_TOOLS: &[&str] = &["Bash", "Read", "Edit", "Write"];

pub struct ClaudeTranslator {
    engine: EngineId,
    claude_cmd: String,
    model: Option<String>,
    allowed_tools: Vec<String>,
    dangerously_skip_permissions: bool,
    use_api_billing: bool,
    title: String,
}

impl ClaudeTranslator {
    pub fn new(claude_cmd: impl Into<String>, model: Option<String>) -> Self {
        let title = model.clone().unwrap_or_else(|| "claude".to_string());
        Self {
            engine: EngineId::new("claude"),
            claude_cmd: claude_cmd.into(),
            model,
            allowed_tools: DEFAULT_ALLOWED_TOOLS.iter().map(|s| s.to_string()).collect(),
            dangerously_skip_permissions: false,
            use_api_billing: false,
            title,
        }
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_dangerously_skip_permissions(mut self, skip: bool) -> Self {
        self.dangerously_skip_permissions = skip;
        self
    }

    pub fn resume_regex() -> Regex {
        Regex::new(r"(?im)^\s*`?claude\s+(?:--resume|-r)\s+(?P<token>[^`\s]+)`?\s*$").unwrap()
    }
}

fn tool_input_path(tool_input: &Value) -> Option<&str> {
    tool_input
        .get("file_path")
        .or_else(|| tool_input.get("path"))
        .and_then(Value::as_str)
}

fn tool_kind_and_title(name: &str, tool_input: &Value) -> (ActionKind, String) {
    match name {
        "Bash" | "Shell" | "KillShell" => {
            let command = tool_input.get("command").and_then(Value::as_str).unwrap_or(name);
            (ActionKind::Command, relativize_command(command))
        }
        "Edit" | "Write" | "NotebookEdit" | "MultiEdit" => match tool_input_path(tool_input) {
            Some(path) => (ActionKind::FileChange, path.to_string()),
            None => (ActionKind::FileChange, name.to_string()),
        },
        "Read" => match tool_input_path(tool_input) {
            Some(path) => (ActionKind::Tool, format!("read: `{path}`")),
            None => (ActionKind::Tool, "read".to_string()),
        },
        "Glob" => {
            let pattern = tool_input.get("pattern").and_then(Value::as_str);
            (ActionKind::Tool, pattern.map(|p| format!("glob: `{p}`")).unwrap_or_else(|| "glob".to_string()))
        }
        "Grep" => {
            let pattern = tool_input.get("pattern").and_then(Value::as_str);
            (ActionKind::Tool, pattern.map(|p| format!("grep: {p}")).unwrap_or_else(|| "grep".to_string()))
        }
        "WebSearch" => {
            let query = tool_input.get("query").and_then(Value::as_str).unwrap_or("search");
            (ActionKind::WebSearch, query.to_string())
        }
        "WebFetch" => {
            let url = tool_input.get("url").and_then(Value::as_str).unwrap_or("fetch");
            (ActionKind::WebSearch, url.to_string())
        }
        "TodoWrite" => (ActionKind::Note, "update todos".to_string()),
        "TodoRead" => (ActionKind::Note, "read todos".to_string()),
        "AskUserQuestion" => (ActionKind::Note, "ask user".to_string()),
        "Task" | "Agent" => {
            let desc = tool_input
                .get("description")
                .or_else(|| tool_input.get("prompt"))
                .and_then(Value::as_str)
                .unwrap_or(name);
            (ActionKind::Subagent, desc.to_string())
        }
        other => (ActionKind::Tool, other.to_string()),
    }
}

fn normalize_tool_result(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str).or_else(|| item.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(_) => content.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
        other => other.to_string(),
    }
}

impl Translator for ClaudeTranslator {
    fn engine(&self) -> &EngineId {
        &self.engine
    }

    fn command(&self) -> &str {
        &self.claude_cmd
    }

    fn build_args(&self, prompt: &str, resume: Option<&ResumeToken>) -> Vec<String> {
        let mut args = vec!["-p".to_string(), "--output-format".to_string(), "stream-json".to_string(), "--verbose".to_string()];
        if let Some(r) = resume {
            args.push("--resume".to_string());
            args.push(r.value.clone());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if !self.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(self.allowed_tools.join(","));
        }
        if self.dangerously_skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args.push("--".to_string());
        args.push(prompt.to_string());
        args
    }

    fn stdin_payload(&self, _prompt: &str, _resume: Option<&ResumeToken>) -> Option<Vec<u8>> {
        None
    }

    fn env(&self) -> Option<Vec<(String, String)>> {
        if self.use_api_billing {
            None
        } else {
            Some(
                std::env::vars()
                    .filter(|(k, _)| k != "ANTHROPIC_API_KEY")
                    .collect(),
            )
        }
    }

    fn translate(
        &self,
        data: &Value,
        state: &mut JsonlRunState,
        _resume: Option<&ResumeToken>,
        _found_session: Option<&ResumeToken>,
    ) -> Vec<Event> {
        let event_type = data.get("type").and_then(Value::as_str).unwrap_or_default();

        match event_type {
            "system" => {
                if data.get("subtype").and_then(Value::as_str) != Some("init") {
                    return vec![];
                }
                let Some(session_id) = data.get("session_id").and_then(Value::as_str) else {
                    return vec![];
                };
                let title = data
                    .get("model")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| self.title.clone());
                vec![Event::Started {
                    engine: self.engine.clone(),
                    resume: ResumeToken::new(self.engine.clone(), session_id),
                    title,
                    meta: None,
                }]
            }
            "assistant" => {
                let mut out = Vec::new();
                let parent_tool_use_id = data.get("parent_tool_use_id").and_then(Value::as_str);
                let content = data
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for block in content {
                    match block.get("type").and_then(Value::as_str) {
                        Some("tool_use") => {
                            let tool_id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                            let name = block.get("name").and_then(Value::as_str).unwrap_or("tool");
                            let input = block.get("input").cloned().unwrap_or(Value::Null);
                            let (kind, title) = tool_kind_and_title(name, &input);
                            let mut detail = serde_json::Map::new();
                            detail.insert("name".into(), Value::String(name.to_string()));
                            detail.insert("input".into(), input.clone());
                            if let Some(parent) = parent_tool_use_id {
                                detail.insert("parent_tool_use_id".into(), Value::String(parent.to_string()));
                            }
                            let action = Action::new(tool_id.clone(), kind, title.clone()).with_detail(detail);
                            state.pending_actions.insert(tool_id.clone(), action.clone());
                            out.push(Event::Action {
                                engine: self.engine.clone(),
                                action,
                                phase: Phase::Started,
                                ok: None,
                                message: None,
                                level: None,
                            });
                        }
                        Some("thinking") => {
                            let thinking = block.get("thinking").and_then(Value::as_str).unwrap_or_default();
                            if thinking.is_empty() {
                                continue;
                            }
                            let id = state.next_note_id("claude.thinking");
                            out.push(Event::Action {
                                engine: self.engine.clone(),
                                action: Action::new(id, ActionKind::Note, thinking.to_string()),
                                phase: Phase::Completed,
                                ok: Some(true),
                                message: None,
                                level: None,
                            });
                        }
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                if !text.is_empty() {
                                    state.last_assistant_text = Some(text.to_string());
                                }
                            }
                        }
                        _ => {}
                    }
                }
                out
            }
            "user" => {
                let content = data
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let mut out = Vec::new();
                for block in content {
                    if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                        continue;
                    }
                    let tool_use_id = block.get("tool_use_id").and_then(Value::as_str).unwrap_or_default().to_string();
                    let action = state
                        .pending_actions
                        .remove(&tool_use_id)
                        .unwrap_or_else(|| Action::new(tool_use_id.clone(), ActionKind::Tool, "tool result"));
                    let is_error = block.get("is_error").and_then(Value::as_bool).unwrap_or(false);
                    let normalized = normalize_tool_result(block.get("content").unwrap_or(&Value::Null));
                    let mut detail = action.detail.clone();
                    detail.insert("tool_use_id".into(), Value::String(tool_use_id));
                    detail.insert("result_preview".into(), Value::String(normalized.clone()));
                    detail.insert("result_len".into(), Value::from(normalized.len()));
                    detail.insert("is_error".into(), Value::Bool(is_error));
                    out.push(Event::Action {
                        engine: self.engine.clone(),
                        action: Action::new(action.id.clone(), action.kind, action.title.clone()).with_detail(detail),
                        phase: Phase::Completed,
                        ok: Some(!is_error),
                        message: None,
                        level: None,
                    });
                }
                out
            }
            "result" => {
                let is_error = data.get("is_error").and_then(Value::as_bool).unwrap_or(false);
                let ok = !is_error;
                let mut answer = data.get("result").and_then(Value::as_str).unwrap_or_default().to_string();
                if ok && answer.is_empty() {
                    if let Some(text) = &state.last_assistant_text {
                        answer = text.clone();
                    }
                }
                let session_id = data.get("session_id").and_then(Value::as_str).unwrap_or_default();
                let error = if ok {
                    None
                } else {
                    let text = data.get("result").and_then(Value::as_str).filter(|s| !s.is_empty());
                    Some(text.map(str::to_string).unwrap_or_else(|| {
                        let subtype = data.get("subtype").and_then(Value::as_str);
                        match subtype {
                            Some(subtype) => format!("claude run failed ({subtype})"),
                            None => "claude run failed".to_string(),
                        }
                    }))
                };
                let mut extra = serde_json::Map::new();
                for key in ["total_cost_usd", "duration_ms", "duration_api_ms", "num_turns"] {
                    if let Some(v) = data.get(key) {
                        extra.insert(key.to_string(), v.clone());
                    }
                }
                let usage = data.get("usage").map(|u| Usage {
                    input_tokens: u.get("input_tokens").and_then(Value::as_u64),
                    output_tokens: u.get("output_tokens").and_then(Value::as_u64),
                    extra,
                });
                vec![Event::Completed {
                    engine: self.engine.clone(),
                    ok,
                    answer,
                    resume: Some(ResumeToken::new(self.engine.clone(), session_id)),
                    error,
                    usage,
                }]
            }
            _ => vec![],
        }
    }

    fn stream_end_events(
        &self,
        state: &mut JsonlRunState,
        resume: Option<&ResumeToken>,
        found_session: Option<&ResumeToken>,
    ) -> Vec<Event> {
        let Some(found) = found_session.or(resume) else {
            return vec![Event::Completed {
                engine: self.engine.clone(),
                ok: false,
                answer: String::new(),
                resume: None,
                error: Some("claude finished but no session_id was captured".to_string()),
                usage: None,
            }];
        };
        vec![Event::Completed {
            engine: self.engine.clone(),
            ok: false,
            answer: state.last_assistant_text.clone().unwrap_or_default(),
            resume: Some(found.clone()),
            error: Some("claude finished without a result event".to_string()),
            usage: None,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_kind_for_bash_relativizes_command() {
        let (kind, title) = tool_kind_and_title("Bash", &serde_json::json!({"command": "/usr/bin/ls -la"}));
        assert_eq!(kind, ActionKind::Command);
        assert_eq!(title, "ls -la");
    }

    #[test]
    fn system_init_emits_started() {
        let translator = ClaudeTranslator::new("claude", None);
        let mut state = JsonlRunState::default();
        let data: Value = serde_json::from_str(r#"{"type":"system","subtype":"init","session_id":"sess-1"}"#).unwrap();
        let events = translator.translate(&data, &mut state, None, None);
        match &events[0] {
            Event::Started { resume, .. } => assert_eq!(resume.value, "sess-1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tool_use_then_result_pairs_by_id() {
        let translator = ClaudeTranslator::new("claude", None);
        let mut state = JsonlRunState::default();
        let assistant: Value = serde_json::from_str(
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"echo hi"}}]}}"#,
        )
        .unwrap();
        translator.translate(&assistant, &mut state, None, None);
        assert!(state.pending_actions.contains_key("t1"));

        let user: Value = serde_json::from_str(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"hi","is_error":false}]}}"#,
        )
        .unwrap();
        let events = translator.translate(&user, &mut state, None, None);
        assert!(state.pending_actions.is_empty());
        match &events[0] {
            Event::Action { ok, .. } => assert_eq!(*ok, Some(true)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
