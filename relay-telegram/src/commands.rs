//! User-visible chat surface the orchestrator MUST honor (spec.md §6):
//! `/cancel`, a leading `/<engine>` line, and the `takopi:cancel` callback
//! button. Resume-line recognition lives in `relay_session` already.

use relay_core::EngineId;

/// Inline-keyboard callback data equivalent to `/cancel` (spec.md §6).
pub const CANCEL_CALLBACK_DATA: &str = "takopi:cancel";

/// True iff `text`'s first non-empty line is exactly `/cancel`.
pub fn is_cancel_command(text: &str) -> bool {
    text.lines().map(str::trim).find(|l| !l.is_empty()) == Some("/cancel")
}

/// True iff `data` (a callback query's `data` field) requests cancellation.
pub fn is_cancel_callback(data: &str) -> bool {
    data == CANCEL_CALLBACK_DATA
}

/// If the first non-empty line of `text` is `/<engine>`, returns the engine
/// and the remaining text with that line removed. Otherwise returns `text`
/// unchanged with no engine override.
pub fn extract_engine_override(text: &str) -> (Option<EngineId>, String) {
    let mut lines = text.lines();
    let mut prefix_blank = Vec::new();
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            prefix_blank.push(line);
            continue;
        }
        let trimmed = line.trim();
        if let Some(name) = trimmed.strip_prefix('/') {
            let name = name.trim();
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                let rest: Vec<&str> = lines.collect();
                let remaining = rest.join("\n");
                return (Some(EngineId::new(name.to_lowercase())), remaining);
            }
        }
        break;
    }
    (None, text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_cancel_as_first_line() {
        assert!(is_cancel_command("/cancel"));
        assert!(is_cancel_command("  /cancel  \nfollowup"));
        assert!(!is_cancel_command("please /cancel this"));
    }

    #[test]
    fn recognizes_cancel_callback_data() {
        assert!(is_cancel_callback("takopi:cancel"));
        assert!(!is_cancel_callback("takopi:other"));
    }

    #[test]
    fn extracts_leading_engine_override() {
        let (engine, rest) = extract_engine_override("/codex\ndo the thing");
        assert_eq!(engine.map(|e| e.as_str().to_string()), Some("codex".to_string()));
        assert_eq!(rest, "do the thing");
    }

    #[test]
    fn no_override_when_first_line_is_plain_text() {
        let (engine, rest) = extract_engine_override("do the thing\n/codex later");
        assert!(engine.is_none());
        assert_eq!(rest, "do the thing\n/codex later");
    }

    #[test]
    fn blank_leading_lines_are_skipped() {
        let (engine, rest) = extract_engine_override("\n\n/claude\nhello");
        assert_eq!(engine.map(|e| e.as_str().to_string()), Some("claude".to_string()));
        assert_eq!(rest, "hello");
    }
}
