//! Pi coding agent translator (`pi --print --mode json`), grounded on
//! `original_source/src/takopi/runners/pi.py`.
//!
//! Unlike codex/claude, pi never reports its own session id: the caller
//! picks a session file path up front and passes it with `--session`. A
//! fresh session mints that path in [`Translator::new_state`] so it is
//! known before `build_args` runs.

use std::path::PathBuf;

use regex::Regex;
use serde_json::Value;

use relay_core::{Action, ActionKind, EngineId, Event, Phase, ResumeToken, Usage};

use crate::engines::codex::relativize_command;
use crate::translator::{JsonlRunState, Translator};

pub struct PiTranslator {
    engine: EngineId,
    extra_args: Vec<String>,
    model: Option<String>,
    provider: Option<String>,
    title: String,
}

impl PiTranslator {
    pub fn new(extra_args: Vec<String>, model: Option<String>, provider: Option<String>) -> Self {
        Self {
            engine: EngineId::new("pi"),
            extra_args,
            model,
            provider,
            title: "pi".to_string(),
        }
    }

    pub fn resume_regex() -> Regex {
        Regex::new(r#"(?im)^\s*`?pi\s+--session\s+(?P<token>.+?)`?\s*$"#).unwrap()
    }

    /// Strips a single layer of matching quotes, mirroring
    /// `PiRunner.extract_resume`'s handling of a quoted session path.
    pub fn unquote_token(token: &str) -> String {
        let token = token.trim();
        let bytes = token.as_bytes();
        if bytes.len() >= 2 && bytes[0] == bytes[bytes.len() - 1] && (bytes[0] == b'"' || bytes[0] == b'\'') {
            token[1..token.len() - 1].to_string()
        } else {
            token.to_string()
        }
    }

    fn new_session_path(&self) -> String {
        let base = std::env::var("PI_CODING_AGENT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".pi").join("agent"));
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let safe_path = format!(
            "--{}--",
            cwd.to_string_lossy()
                .trim_start_matches(['/', '\\'])
                .replace('/', "-")
                .replace('\\', "-")
                .replace(':', "-")
        );
        let session_dir = base.join("sessions").join(safe_path);
        let timestamp = chrono::Utc::now().to_rfc3339().replace(':', "-").replace('.', "-");
        let token = uuid::Uuid::new_v4().simple().to_string();
        session_dir.join(format!("{timestamp}_{token}.jsonl")).to_string_lossy().into_owned()
    }

    fn sanitize_prompt(prompt: &str) -> String {
        if prompt.starts_with('-') {
            format!(" {prompt}")
        } else {
            prompt.to_string()
        }
    }
}

fn extract_text_blocks(content: &Value) -> Option<String> {
    let items = content.as_array()?;
    let mut parts = Vec::new();
    for item in items {
        if item.get("type").and_then(Value::as_str) != Some("text") {
            continue;
        }
        if let Some(text) = item.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                parts.push(text);
            }
        }
    }
    if parts.is_empty() {
        None
    } else {
        let joined = parts.join("").trim().to_string();
        if joined.is_empty() { None } else { Some(joined) }
    }
}

fn assistant_error(message: &Value) -> Option<String> {
    let stop_reason = message.get("stopReason").and_then(Value::as_str)?;
    if stop_reason != "error" && stop_reason != "aborted" {
        return None;
    }
    match message.get("errorMessage").and_then(Value::as_str) {
        Some(err) if !err.is_empty() => Some(err.to_string()),
        _ => Some(format!("pi run {stop_reason}")),
    }
}

fn tool_kind_and_title(name: &str, args: &Value) -> (ActionKind, String) {
    match name.to_lowercase().as_str() {
        "bash" => {
            let command = args.get("command").and_then(Value::as_str).unwrap_or("bash");
            (ActionKind::Command, relativize_command(command))
        }
        "edit" | "write" => match args.get("path").and_then(Value::as_str) {
            Some(path) => (ActionKind::FileChange, path.to_string()),
            None => (ActionKind::FileChange, name.to_lowercase()),
        },
        "read" => match args.get("path").and_then(Value::as_str) {
            Some(path) => (ActionKind::Tool, format!("read: `{path}`")),
            None => (ActionKind::Tool, "read".to_string()),
        },
        "grep" => {
            let pattern = args.get("pattern").and_then(Value::as_str);
            (ActionKind::Tool, pattern.map(|p| format!("grep: {p}")).unwrap_or_else(|| "grep".to_string()))
        }
        "find" => {
            let pattern = args.get("pattern").and_then(Value::as_str);
            (ActionKind::Tool, pattern.map(|p| format!("find: {p}")).unwrap_or_else(|| "find".to_string()))
        }
        "ls" => match args.get("path").and_then(Value::as_str) {
            Some(path) => (ActionKind::Tool, format!("ls: `{path}`")),
            None => (ActionKind::Tool, "ls".to_string()),
        },
        _ => (ActionKind::Tool, name.to_string()),
    }
}

fn last_assistant_message(messages: &Value) -> Option<&Value> {
    messages
        .as_array()?
        .iter()
        .rev()
        .find(|item| item.get("role").and_then(Value::as_str) == Some("assistant"))
}

impl Translator for PiTranslator {
    fn engine(&self) -> &EngineId {
        &self.engine
    }

    fn command(&self) -> &str {
        "pi"
    }

    fn new_state(&self, resume: Option<&ResumeToken>) -> JsonlRunState {
        let mut state = JsonlRunState::default();
        state.session = Some(match resume {
            Some(r) => r.clone(),
            None => ResumeToken::new(self.engine.clone(), self.new_session_path()),
        });
        state
    }

    fn build_args(&self, prompt: &str, resume: Option<&ResumeToken>) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.push("--print".to_string());
        args.push("--mode".to_string());
        args.push("json".to_string());
        if let Some(provider) = &self.provider {
            args.push("--provider".to_string());
            args.push(provider.clone());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(r) = resume {
            args.push("--session".to_string());
            args.push(r.value.clone());
        }
        args.push(Self::sanitize_prompt(prompt));
        args
    }

    fn stdin_payload(&self, _prompt: &str, _resume: Option<&ResumeToken>) -> Option<Vec<u8>> {
        None
    }

    fn env(&self) -> Option<Vec<(String, String)>> {
        let mut env: Vec<(String, String)> = std::env::vars().collect();
        if !env.iter().any(|(k, _)| k == "NO_COLOR") {
            env.push(("NO_COLOR".to_string(), "1".to_string()));
        }
        if !env.iter().any(|(k, _)| k == "CI") {
            env.push(("CI".to_string(), "1".to_string()));
        }
        Some(env)
    }

    fn translate(
        &self,
        data: &Value,
        state: &mut JsonlRunState,
        resume: Option<&ResumeToken>,
        found_session: Option<&ResumeToken>,
    ) -> Vec<Event> {
        let mut out = Vec::new();
        let session = found_session.or(resume).or(state.session.as_ref()).cloned();
        if !state.session_started {
            let Some(session) = session.clone() else { return out };
            state.session_started = true;
            let mut meta = serde_json::Map::new();
            if let Ok(cwd) = std::env::current_dir() {
                meta.insert("cwd".into(), Value::String(cwd.to_string_lossy().into_owned()));
            }
            if let Some(model) = &self.model {
                meta.insert("model".into(), Value::String(model.clone()));
            }
            if let Some(provider) = &self.provider {
                meta.insert("provider".into(), Value::String(provider.clone()));
            }
            out.push(Event::Started {
                engine: self.engine.clone(),
                resume: session,
                title: self.title.clone(),
                meta: if meta.is_empty() { None } else { Some(Value::Object(meta)) },
            });
        }

        let event_type = data.get("type").and_then(Value::as_str).unwrap_or_default();
        match event_type {
            "tool_execution_start" => {
                let Some(tool_id) = data.get("toolCallId").and_then(Value::as_str) else { return out };
                let name = data.get("toolName").and_then(Value::as_str).unwrap_or("tool");
                let args = data.get("args").cloned().unwrap_or(Value::Object(Default::default()));
                let (kind, title) = tool_kind_and_title(name, &args);
                let mut detail = serde_json::Map::new();
                detail.insert("tool_name".into(), Value::String(name.to_string()));
                detail.insert("args".into(), args.clone());
                if kind == ActionKind::FileChange {
                    if let Some(path) = args.get("path") {
                        detail.insert(
                            "changes".into(),
                            Value::Array(vec![serde_json::json!({"path": path, "kind": "update"})]),
                        );
                    }
                }
                let action = Action::new(tool_id.to_string(), kind, title).with_detail(detail);
                state.pending_actions.insert(tool_id.to_string(), action.clone());
                out.push(Event::Action {
                    engine: self.engine.clone(),
                    action,
                    phase: Phase::Started,
                    ok: None,
                    message: None,
                    level: None,
                });
                out
            }
            "tool_execution_end" => {
                let Some(tool_id) = data.get("toolCallId").and_then(Value::as_str) else { return out };
                let name = data.get("toolName").and_then(Value::as_str).unwrap_or("tool");
                let result = data.get("result").cloned().unwrap_or(Value::Null);
                let is_error = data.get("isError").and_then(Value::as_bool).unwrap_or(false);
                let action = state
                    .pending_actions
                    .remove(tool_id)
                    .unwrap_or_else(|| Action::new(tool_id.to_string(), ActionKind::Tool, name));
                let mut detail = action.detail.clone();
                detail.insert("result".into(), result);
                detail.insert("is_error".into(), Value::Bool(is_error));
                out.push(Event::Action {
                    engine: self.engine.clone(),
                    action: Action::new(action.id, action.kind, action.title).with_detail(detail),
                    phase: Phase::Completed,
                    ok: Some(!is_error),
                    message: None,
                    level: None,
                });
                out
            }
            "message_end" => {
                let Some(message) = data.get("message") else { return out };
                if message.get("role").and_then(Value::as_str) != Some("assistant") {
                    return out;
                }
                if let Some(text) = message.get("content").and_then(extract_text_blocks) {
                    state.last_assistant_text = Some(text);
                }
                if let Some(usage) = message.get("usage") {
                    state.usage = parse_usage(usage);
                }
                if let Some(error) = assistant_error(message) {
                    state.run_error = Some(error);
                }
                out
            }
            "agent_end" => {
                if let Some(assistant) = data.get("messages").and_then(last_assistant_message) {
                    if let Some(text) = assistant.get("content").and_then(extract_text_blocks) {
                        state.last_assistant_text = Some(text);
                    }
                    if let Some(usage) = assistant.get("usage") {
                        state.usage = parse_usage(usage);
                    }
                    if let Some(error) = assistant_error(assistant) {
                        state.run_error = Some(error);
                    }
                }
                let Some(resume) = session else { return out };
                out.push(Event::Completed {
                    engine: self.engine.clone(),
                    ok: state.run_error.is_none(),
                    answer: state.last_assistant_text.clone().unwrap_or_default(),
                    resume: Some(resume),
                    error: state.run_error.clone(),
                    usage: state.usage.clone(),
                });
                out
            }
            _ => out,
        }
    }

    fn process_error_events(
        &self,
        state: &mut JsonlRunState,
        rc: i32,
        resume: Option<&ResumeToken>,
        found_session: Option<&ResumeToken>,
    ) -> Vec<Event> {
        let message = format!("pi failed (rc={rc}).");
        let resume_for_completed = found_session.or(resume).or(state.session.as_ref()).cloned();
        vec![
            self.note_event(state, message.clone(), false),
            Event::Completed {
                engine: self.engine.clone(),
                ok: false,
                answer: state.last_assistant_text.clone().unwrap_or_default(),
                resume: resume_for_completed,
                error: Some(message),
                usage: state.usage.clone(),
            },
        ]
    }

    fn stream_end_events(
        &self,
        state: &mut JsonlRunState,
        resume: Option<&ResumeToken>,
        found_session: Option<&ResumeToken>,
    ) -> Vec<Event> {
        let resume_for_completed = found_session.or(resume).or(state.session.as_ref()).cloned();
        vec![Event::Completed {
            engine: self.engine.clone(),
            ok: false,
            answer: state.last_assistant_text.clone().unwrap_or_default(),
            resume: resume_for_completed,
            error: Some("pi finished without an agent_end event".to_string()),
            usage: state.usage.clone(),
        }]
    }
}

fn parse_usage(usage: &Value) -> Option<Usage> {
    Some(Usage {
        input_tokens: usage.get("input_tokens").and_then(Value::as_u64),
        output_tokens: usage.get("output_tokens").and_then(Value::as_u64),
        extra: usage.as_object().cloned().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unquotes_matching_quotes() {
        assert_eq!(PiTranslator::unquote_token("\"abc def\""), "abc def");
        assert_eq!(PiTranslator::unquote_token("plain"), "plain");
    }

    #[test]
    fn build_args_includes_session_and_prompt() {
        let translator = PiTranslator::new(vec![], None, None);
        let resume = ResumeToken::new("pi", "/tmp/session.jsonl");
        let args = translator.build_args("hello", Some(&resume));
        assert!(args.contains(&"--session".to_string()));
        assert!(args.contains(&"/tmp/session.jsonl".to_string()));
        assert_eq!(args.last().unwrap(), "hello");
    }

    #[test]
    fn new_state_mints_session_path_when_absent() {
        let translator = PiTranslator::new(vec![], None, None);
        let state = translator.new_state(None);
        assert!(state.session.is_some());
    }

    #[test]
    fn first_translate_call_emits_started() {
        let translator = PiTranslator::new(vec![], None, None);
        let mut state = translator.new_state(None);
        let data: Value = serde_json::from_str(r#"{"type":"tool_execution_start","toolCallId":"t1","toolName":"bash","args":{"command":"ls"}}"#).unwrap();
        let session = state.session.clone();
        let events = translator.translate(&data, &mut state, session.as_ref(), None);
        assert!(matches!(events[0], Event::Started { .. }));
    }
}
