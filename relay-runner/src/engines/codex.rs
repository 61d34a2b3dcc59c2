//! Codex CLI translator (`codex exec --json`), grounded on
//! `original_source/src/takopi/runners/codex.py`.

use regex::Regex;
use serde_json::Value;

use relay_core::{Action, ActionKind, EngineId, Event, Level, Phase, ResumeToken, Usage};

use crate::translator::{JsonlRunState, Translator};

fn reconnect_re() -> Regex {
    Regex::new(r"(?i)^Reconnecting\.{3}\s*(?P<attempt>\d+)/(?P<max>\d+)\s*$").unwrap()
}

/// Strips a leading absolute path prefix down to something readable in a
/// Telegram message, mirroring `utils/paths.py::relativize_command` closely
/// enough for display purposes: only the final path segment of the first
/// whitespace-delimited token is kept when it looks like an absolute path.
pub fn relativize_command(command: &str) -> String {
    let mut parts = command.splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("");
    let rest = parts.next();
    let shortened = if first.starts_with('/') {
        first.rsplit('/').next().unwrap_or(first).to_string()
    } else {
        first.to_string()
    };
    match rest {
        Some(rest) => format!("{shortened} {rest}"),
        None => shortened,
    }
}

pub struct CodexTranslator {
    engine: EngineId,
    codex_cmd: String,
    extra_args: Vec<String>,
    title: String,
}

impl CodexTranslator {
    pub fn new(codex_cmd: impl Into<String>, extra_args: Vec<String>, title: impl Into<String>) -> Self {
        Self {
            engine: EngineId::new("codex"),
            codex_cmd: codex_cmd.into(),
            extra_args,
            title: title.into(),
        }
    }

    pub fn resume_regex() -> Regex {
        Regex::new(r"(?im)^\s*`?codex\s+resume\s+(?P<token>[^`\s]+)`?\s*$").unwrap()
    }

    fn translate_item(&self, phase: Phase, item: &Value) -> Vec<Event> {
        let id = item.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        let item_type = item.get("item_type").and_then(Value::as_str).unwrap_or_default();

        match item_type {
            "agent_message" => vec![],
            "error" => {
                if phase != Phase::Completed {
                    return vec![];
                }
                let message = item.get("message").and_then(Value::as_str).unwrap_or("codex error").to_string();
                vec![self.action_completed(id, ActionKind::Warning, message.clone(), false, Some(message))]
            }
            "command_execution" => {
                let command = item.get("command").and_then(Value::as_str).unwrap_or_default();
                let title = relativize_command(command);
                if phase != Phase::Completed {
                    return vec![self.action(phase, id, ActionKind::Command, title)];
                }
                let status = item.get("status").and_then(Value::as_str).unwrap_or_default();
                let exit_code = item.get("exit_code").and_then(Value::as_i64);
                let ok = status == "completed" && exit_code.map(|c| c == 0).unwrap_or(status == "completed");
                vec![self.action_completed(id, ActionKind::Command, title, ok, None)]
            }
            "mcp_tool_call" => {
                let server = item.get("server").and_then(Value::as_str);
                let tool = item.get("tool").and_then(Value::as_str);
                let title = match (server, tool) {
                    (Some(s), Some(t)) => format!("{s}.{t}"),
                    (Some(s), None) => s.to_string(),
                    (None, Some(t)) => t.to_string(),
                    (None, None) => "tool".to_string(),
                };
                if phase != Phase::Completed {
                    return vec![self.action(phase, id, ActionKind::Tool, title)];
                }
                let status = item.get("status").and_then(Value::as_str).unwrap_or_default();
                let has_error = item.get("error").map(|e| !e.is_null()).unwrap_or(false);
                let ok = status == "completed" && !has_error;
                vec![self.action_completed(id, ActionKind::Tool, title, ok, None)]
            }
            "web_search" => {
                let query = item.get("query").and_then(Value::as_str).unwrap_or_default().to_string();
                if phase != Phase::Completed {
                    return vec![self.action(phase, id, ActionKind::WebSearch, query)];
                }
                vec![self.action_completed(id, ActionKind::WebSearch, query, true, None)]
            }
            "file_change" => {
                if phase != Phase::Completed {
                    return vec![];
                }
                let changes = item.get("changes").and_then(Value::as_array).cloned().unwrap_or_default();
                let title = format_change_summary(&changes);
                let status = item.get("status").and_then(Value::as_str).unwrap_or_default();
                vec![self.action_completed(id, ActionKind::FileChange, title, status == "completed", None)]
            }
            "todo_list" => {
                let items = item.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
                let (done, total, next_text) = summarize_todo(&items);
                let title = todo_title(done, total, next_text.as_deref());
                if phase != Phase::Completed {
                    return vec![self.action(phase, id, ActionKind::Note, title)];
                }
                vec![self.action_completed(id, ActionKind::Note, title, true, None)]
            }
            "reasoning" => {
                let text = item.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
                if phase != Phase::Completed {
                    return vec![self.action(phase, id, ActionKind::Note, text)];
                }
                vec![self.action_completed(id, ActionKind::Note, text, true, None)]
            }
            _ => vec![],
        }
    }

    fn action(&self, phase: Phase, id: String, kind: ActionKind, title: String) -> Event {
        Event::Action {
            engine: self.engine.clone(),
            action: Action::new(id, kind, title),
            phase,
            ok: None,
            message: None,
            level: None,
        }
    }

    fn action_completed(
        &self,
        id: String,
        kind: ActionKind,
        title: String,
        ok: bool,
        message: Option<String>,
    ) -> Event {
        Event::Action {
            engine: self.engine.clone(),
            action: Action::new(id, kind, title),
            phase: Phase::Completed,
            ok: Some(ok),
            message,
            level: if ok { None } else { Some(Level::Warning) },
        }
    }
}

fn format_change_summary(changes: &[Value]) -> String {
    let paths: Vec<&str> = changes
        .iter()
        .filter_map(|c| c.get("path").and_then(Value::as_str))
        .collect();
    if paths.is_empty() {
        if changes.is_empty() {
            "files".to_string()
        } else {
            format!("{} files", changes.len())
        }
    } else {
        paths.join(", ")
    }
}

fn summarize_todo(items: &[Value]) -> (u64, u64, Option<String>) {
    let mut done = 0;
    let mut total = 0;
    let mut next_text = None;
    for item in items {
        total += 1;
        let completed = item.get("completed").and_then(Value::as_bool).unwrap_or(false);
        if completed {
            done += 1;
        } else if next_text.is_none() {
            next_text = item.get("text").and_then(Value::as_str).map(str::to_string);
        }
    }
    (done, total, next_text)
}

fn todo_title(done: u64, total: u64, next_text: Option<&str>) -> String {
    if total == 0 {
        return "todo".to_string();
    }
    match next_text {
        Some(text) => format!("todo {done}/{total}: {text}"),
        None => format!("todo {done}/{total}: done"),
    }
}

impl Translator for CodexTranslator {
    fn engine(&self) -> &EngineId {
        &self.engine
    }

    fn command(&self) -> &str {
        &self.codex_cmd
    }

    fn build_args(&self, _prompt: &str, resume: Option<&ResumeToken>) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.push("exec".into());
        args.push("--skip-git-repo-check".into());
        args.push("--json".into());
        match resume {
            Some(r) => {
                args.push("resume".into());
                args.push(r.value.clone());
                args.push("-".into());
            }
            None => args.push("-".into()),
        }
        args
    }

    fn translate(
        &self,
        data: &Value,
        state: &mut JsonlRunState,
        resume: Option<&ResumeToken>,
        found_session: Option<&ResumeToken>,
    ) -> Vec<Event> {
        let event_type = data.get("type").and_then(Value::as_str).unwrap_or_default();

        match event_type {
            "thread.started" => {
                let thread_id = data.get("thread_id").and_then(Value::as_str).unwrap_or_default();
                vec![Event::Started {
                    engine: self.engine.clone(),
                    resume: ResumeToken::new(self.engine.clone(), thread_id),
                    title: self.title.clone(),
                    meta: None,
                }]
            }
            "item.started" | "item.updated" | "item.completed" => {
                let phase = match event_type {
                    "item.started" => Phase::Started,
                    "item.updated" => Phase::Updated,
                    _ => Phase::Completed,
                };
                let item = data.get("item").cloned().unwrap_or(Value::Null);
                if phase == Phase::Completed && item.get("item_type").and_then(Value::as_str) == Some("agent_message") {
                    if let Some(text) = item.get("text").and_then(Value::as_str) {
                        state.final_answer = Some(text.to_string());
                    }
                }
                self.translate_item(phase, &item)
            }
            "turn.started" => {
                let id = format!("turn_{}", state.turn_index);
                state.turn_index += 1;
                vec![Event::Action {
                    engine: self.engine.clone(),
                    action: Action::new(id, ActionKind::Turn, "turn started"),
                    phase: Phase::Started,
                    ok: None,
                    message: None,
                    level: None,
                }]
            }
            "turn.completed" => {
                let resume_for_completed = found_session.or(resume).cloned();
                let usage = data.get("usage").map(|u| Usage {
                    input_tokens: u.get("input_tokens").and_then(Value::as_u64),
                    output_tokens: u.get("output_tokens").and_then(Value::as_u64),
                    extra: u.as_object().cloned().unwrap_or_default(),
                });
                vec![Event::Completed {
                    engine: self.engine.clone(),
                    ok: true,
                    answer: state.final_answer.clone().unwrap_or_default(),
                    resume: resume_for_completed,
                    error: None,
                    usage,
                }]
            }
            "turn.failed" => {
                let message = data
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("codex turn failed")
                    .to_string();
                let resume_for_completed = found_session.or(resume).cloned();
                vec![Event::Completed {
                    engine: self.engine.clone(),
                    ok: false,
                    answer: state.final_answer.clone().unwrap_or_default(),
                    resume: resume_for_completed,
                    error: Some(message),
                    usage: None,
                }]
            }
            "error" => {
                let message = data.get("message").and_then(Value::as_str).unwrap_or_default();
                if let Some(caps) = reconnect_re().captures(message) {
                    let attempt: u32 = caps["attempt"].parse().unwrap_or(1);
                    let max: u32 = caps["max"].parse().unwrap_or(attempt);
                    let phase = if attempt <= 1 { Phase::Started } else { Phase::Updated };
                    return vec![Event::Action {
                        engine: self.engine.clone(),
                        action: Action::new("codex.reconnect", ActionKind::Note, message)
                            .with_detail(serde_json::json!({"attempt": attempt, "max": max}).as_object().unwrap().clone()),
                        phase,
                        ok: None,
                        message: None,
                        level: Some(Level::Info),
                    }];
                }
                vec![self.note_event(state, message.to_string(), false)]
            }
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relativizes_absolute_command() {
        assert_eq!(relativize_command("/usr/bin/ls -la"), "ls -la");
        assert_eq!(relativize_command("echo hi"), "echo hi");
    }

    #[test]
    fn started_event_carries_thread_id() {
        let translator = CodexTranslator::new("codex", vec![], "Codex");
        let mut state = JsonlRunState::default();
        let data: Value = serde_json::from_str(r#"{"type":"thread.started","thread_id":"abc-123"}"#).unwrap();
        let events = translator.translate(&data, &mut state, None, None);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Started { resume, .. } => assert_eq!(resume.value, "abc-123"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn turn_completed_uses_buffered_final_answer() {
        let translator = CodexTranslator::new("codex", vec![], "Codex");
        let mut state = JsonlRunState::default();
        state.final_answer = Some("done".into());
        let data: Value = serde_json::from_str(r#"{"type":"turn.completed","usage":{"input_tokens":10,"output_tokens":5}}"#).unwrap();
        let events = translator.translate(&data, &mut state, None, Some(&ResumeToken::new("codex", "abc")));
        match &events[0] {
            Event::Completed { ok, answer, resume, .. } => {
                assert!(*ok);
                assert_eq!(answer, "done");
                assert_eq!(resume.as_ref().unwrap().value, "abc");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn reconnect_note_parses_attempt_and_max() {
        let translator = CodexTranslator::new("codex", vec![], "Codex");
        let mut state = JsonlRunState::default();
        let data: Value = serde_json::from_str(r#"{"type":"error","message":"Reconnecting... 2/5"}"#).unwrap();
        let events = translator.translate(&data, &mut state, None, None);
        match &events[0] {
            Event::Action { phase, .. } => assert_eq!(*phase, Phase::Updated),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn resume_regex_matches_backtick_form() {
        let re = CodexTranslator::resume_regex();
        let caps = re.captures("`codex resume abc-123`").unwrap();
        assert_eq!(&caps["token"], "abc-123");
    }
}
