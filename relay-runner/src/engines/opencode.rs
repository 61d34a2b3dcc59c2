//! OpenCode CLI translator (`opencode run --format json`), grounded on
//! `original_source/src/takopi/runners/opencode.py`.
//!
//! OpenCode session ids look like `ses_XXXX` and can show up on any event,
//! not just the first one, so [`OpenCodeTranslator`] buffers the id until a
//! `step_start` event is free to carry the synthesized `Started`.

use regex::Regex;
use serde_json::Value;

use relay_core::{Action, ActionKind, EngineId, Event, Phase, ResumeToken};

use crate::engines::codex::relativize_command;
use crate::translator::{JsonlRunState, Translator};

pub struct OpenCodeTranslator {
    engine: EngineId,
    opencode_cmd: String,
    model: Option<String>,
    title: String,
}

impl OpenCodeTranslator {
    pub fn new(opencode_cmd: impl Into<String>, model: Option<String>) -> Self {
        let title = model.clone().unwrap_or_else(|| "opencode".to_string());
        Self {
            engine: EngineId::new("opencode"),
            opencode_cmd: opencode_cmd.into(),
            model,
            title,
        }
    }

    pub fn resume_regex() -> Regex {
        Regex::new(r"(?im)^\s*`?opencode(?:\s+run)?\s+(?:--session|-s)\s+(?P<token>ses_[A-Za-z0-9]+)`?\s*$").unwrap()
    }
}

fn session_id_of(data: &Value) -> Option<&str> {
    data.get("sessionID").and_then(Value::as_str)
}

fn tool_kind_and_title(name: &str, tool_input: &Value) -> (ActionKind, String) {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "bash" | "shell" => {
            let command = tool_input.get("command").and_then(Value::as_str).unwrap_or(name);
            (ActionKind::Command, relativize_command(command))
        }
        "edit" | "write" | "multiedit" => {
            let path = tool_input
                .get("file_path")
                .or_else(|| tool_input.get("filePath"))
                .and_then(Value::as_str);
            match path {
                Some(path) => (ActionKind::FileChange, path.to_string()),
                None => (ActionKind::FileChange, name.to_string()),
            }
        }
        "read" => {
            let path = tool_input
                .get("file_path")
                .or_else(|| tool_input.get("filePath"))
                .and_then(Value::as_str);
            match path {
                Some(path) => (ActionKind::Tool, format!("read: `{path}`")),
                None => (ActionKind::Tool, "read".to_string()),
            }
        }
        "glob" => {
            let pattern = tool_input.get("pattern").and_then(Value::as_str);
            (ActionKind::Tool, pattern.map(|p| format!("glob: `{p}`")).unwrap_or_else(|| "glob".to_string()))
        }
        "grep" => {
            let pattern = tool_input.get("pattern").and_then(Value::as_str);
            (ActionKind::Tool, pattern.map(|p| format!("grep: {p}")).unwrap_or_else(|| "grep".to_string()))
        }
        "websearch" | "web_search" => {
            let query = tool_input.get("query").and_then(Value::as_str).unwrap_or("search");
            (ActionKind::WebSearch, query.to_string())
        }
        "webfetch" | "web_fetch" => {
            let url = tool_input.get("url").and_then(Value::as_str).unwrap_or("fetch");
            (ActionKind::WebSearch, url.to_string())
        }
        "todowrite" => (ActionKind::Note, "update todos".to_string()),
        "todoread" => (ActionKind::Note, "read todos".to_string()),
        "task" => {
            let desc = tool_input
                .get("description")
                .or_else(|| tool_input.get("prompt"))
                .and_then(Value::as_str)
                .unwrap_or(name);
            (ActionKind::Tool, desc.to_string())
        }
        _ => (ActionKind::Tool, name.to_string()),
    }
}

fn extract_tool_action(part: &Value) -> Option<Action> {
    let state = part.get("state").cloned().unwrap_or(Value::Null);
    let call_id = part
        .get("callID")
        .and_then(Value::as_str)
        .or_else(|| part.get("id").and_then(Value::as_str))?
        .to_string();
    let tool_name = part.get("tool").and_then(Value::as_str).unwrap_or("tool");
    let tool_input = state.get("input").cloned().unwrap_or(Value::Object(Default::default()));

    let (kind, mut title) = tool_kind_and_title(tool_name, &tool_input);
    if let Some(state_title) = state.get("title").and_then(Value::as_str) {
        if !state_title.is_empty() {
            title = state_title.to_string();
        }
    }

    let mut detail = serde_json::Map::new();
    detail.insert("name".into(), Value::String(tool_name.to_string()));
    detail.insert("input".into(), tool_input.clone());
    detail.insert("callID".into(), Value::String(call_id.clone()));
    if kind == ActionKind::FileChange {
        if let Some(path) = tool_input.get("file_path").or_else(|| tool_input.get("filePath")) {
            detail.insert(
                "changes".into(),
                Value::Array(vec![serde_json::json!({"path": path, "kind": "update"})]),
            );
        }
    }

    Some(Action::new(call_id, kind, title).with_detail(detail))
}

impl Translator for OpenCodeTranslator {
    fn engine(&self) -> &EngineId {
        &self.engine
    }

    fn command(&self) -> &str {
        &self.opencode_cmd
    }

    fn build_args(&self, prompt: &str, resume: Option<&ResumeToken>) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--format".to_string(), "json".to_string()];
        if let Some(r) = resume {
            args.push("--session".to_string());
            args.push(r.value.clone());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.push("--".to_string());
        args.push(prompt.to_string());
        args
    }

    fn stdin_payload(&self, _prompt: &str, _resume: Option<&ResumeToken>) -> Option<Vec<u8>> {
        None
    }

    fn translate(
        &self,
        data: &Value,
        state: &mut JsonlRunState,
        _resume: Option<&ResumeToken>,
        found_session: Option<&ResumeToken>,
    ) -> Vec<Event> {
        if let Some(sid) = session_id_of(data) {
            if state.session.is_none() && found_session.is_none() {
                state.session = Some(ResumeToken::new(self.engine.clone(), sid));
            }
        }

        let event_type = data.get("type").and_then(Value::as_str).unwrap_or_default();
        match event_type {
            "step_start" => {
                if state.session_started {
                    return vec![];
                }
                let Some(session) = found_session.cloned().or_else(|| state.session.clone()) else {
                    return vec![];
                };
                state.session_started = true;
                vec![Event::Started {
                    engine: self.engine.clone(),
                    resume: session,
                    title: self.title.clone(),
                    meta: None,
                }]
            }
            "tool_use" => {
                let Some(part) = data.get("part") else { return vec![] };
                let tool_state = part.get("state").cloned().unwrap_or(Value::Null);
                let status = tool_state.get("status").and_then(Value::as_str).unwrap_or_default();

                let Some(action) = extract_tool_action(part) else { return vec![] };

                match status {
                    "completed" => {
                        let output = tool_state.get("output");
                        let exit_code = tool_state.get("metadata").and_then(|m| m.get("exit")).and_then(Value::as_i64);
                        let is_error = exit_code.map(|c| c != 0).unwrap_or(false);
                        let mut detail = action.detail.clone();
                        if let Some(output) = output {
                            let text = output.as_str().map(str::to_string).unwrap_or_else(|| output.to_string());
                            let preview: String = text.chars().take(500).collect();
                            detail.insert("output_preview".into(), Value::String(preview));
                        }
                        if let Some(exit_code) = exit_code {
                            detail.insert("exit_code".into(), Value::from(exit_code));
                        }
                        state.pending_actions.remove(&action.id);
                        vec![Event::Action {
                            engine: self.engine.clone(),
                            action: Action::new(action.id, action.kind, action.title).with_detail(detail),
                            phase: Phase::Completed,
                            ok: Some(!is_error),
                            message: None,
                            level: None,
                        }]
                    }
                    "error" => {
                        let error = tool_state.get("error").cloned();
                        let mut detail = action.detail.clone();
                        if let Some(error) = &error {
                            detail.insert("error".into(), error.clone());
                        }
                        state.pending_actions.remove(&action.id);
                        let message = error.as_ref().and_then(Value::as_str).map(str::to_string);
                        vec![Event::Action {
                            engine: self.engine.clone(),
                            action: Action::new(action.id, action.kind, action.title).with_detail(detail),
                            phase: Phase::Completed,
                            ok: Some(false),
                            message,
                            level: None,
                        }]
                    }
                    _ => {
                        state.pending_actions.insert(action.id.clone(), action.clone());
                        vec![Event::Action {
                            engine: self.engine.clone(),
                            action,
                            phase: Phase::Started,
                            ok: None,
                            message: None,
                            level: None,
                        }]
                    }
                }
            }
            "text" => {
                if let Some(part) = data.get("part") {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            let mut buf = state.last_assistant_text.take().unwrap_or_default();
                            buf.push_str(text);
                            state.last_assistant_text = Some(buf);
                        }
                    }
                }
                vec![]
            }
            "step_finish" => {
                let reason = data.get("part").and_then(|p| p.get("reason")).and_then(Value::as_str);
                if reason != Some("stop") {
                    return vec![];
                }
                let resume = found_session.cloned().or_else(|| state.session.clone());
                vec![Event::Completed {
                    engine: self.engine.clone(),
                    ok: true,
                    answer: state.last_assistant_text.clone().unwrap_or_default(),
                    resume,
                    error: None,
                    usage: None,
                }]
            }
            "error" => {
                let message = data
                    .get("message")
                    .and_then(Value::as_str)
                    .or_else(|| data.get("error").and_then(Value::as_str))
                    .unwrap_or("opencode error")
                    .to_string();
                let resume = found_session.cloned().or_else(|| state.session.clone());
                vec![Event::Completed {
                    engine: self.engine.clone(),
                    ok: false,
                    answer: state.last_assistant_text.clone().unwrap_or_default(),
                    resume,
                    error: Some(message),
                    usage: None,
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
        let answer = state.last_assistant_text.clone().unwrap_or_default();
        let Some(found) = found_session.or(resume) else {
            return vec![Event::Completed {
                engine: self.engine.clone(),
                ok: false,
                answer,
                resume: None,
                error: Some("opencode finished but no session_id was captured".to_string()),
                usage: None,
            }];
        };
        if state.session_started {
            return vec![Event::Completed {
                engine: self.engine.clone(),
                ok: true,
                answer,
                resume: Some(found.clone()),
                error: None,
                usage: None,
            }];
        }
        vec![Event::Completed {
            engine: self.engine.clone(),
            ok: false,
            answer,
            resume: Some(found.clone()),
            error: Some("opencode finished without a result event".to_string()),
            usage: None,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_start_emits_started_once_session_known() {
        let translator = OpenCodeTranslator::new("opencode", None);
        let mut state = JsonlRunState::default();
        let data: Value = serde_json::from_str(r#"{"type":"step_start","sessionID":"ses_abc"}"#).unwrap();
        let events = translator.translate(&data, &mut state, None, None);
        match &events[0] {
            Event::Started { resume, .. } => assert_eq!(resume.value, "ses_abc"),
            other => panic!("unexpected {other:?}"),
        }
        let again = translator.translate(&data, &mut state, None, None);
        assert!(again.is_empty());
    }

    #[test]
    fn tool_use_started_then_completed_clears_pending() {
        let translator = OpenCodeTranslator::new("opencode", None);
        let mut state = JsonlRunState::default();
        let started: Value = serde_json::from_str(
            r#"{"type":"tool_use","sessionID":"ses_1","part":{"callID":"c1","tool":"bash","state":{"input":{"command":"ls"}}}}"#,
        )
        .unwrap();
        translator.translate(&started, &mut state, None, None);
        assert!(state.pending_actions.contains_key("c1"));

        let completed: Value = serde_json::from_str(
            r#"{"type":"tool_use","sessionID":"ses_1","part":{"callID":"c1","tool":"bash","state":{"input":{"command":"ls"},"status":"completed","output":"ok","metadata":{"exit":0}}}}"#,
        )
        .unwrap();
        let events = translator.translate(&completed, &mut state, None, None);
        assert!(state.pending_actions.is_empty());
        match &events[0] {
            Event::Action { ok, .. } => assert_eq!(*ok, Some(true)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
