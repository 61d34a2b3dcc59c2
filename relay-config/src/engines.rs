//! Per-engine CLI paths and extra arguments, read from environment
//! variables (spec.md §2.3). One field per engine shipped in
//! `relay-runner`; `None` means that engine isn't configured and won't be
//! registered in the `EngineRegistry`.

use std::env;

/// `codex exec --json` invocation settings.
pub struct CodexSettings {
    pub command: String,
    pub extra_args: Vec<String>,
    pub title: String,
}

/// `pi` invocation settings (no fixed command — the translator always
/// shells out to the `pi` binary on `PATH`, matching
/// `original_source/src/takopi/runners/pi.py`).
pub struct PiSettings {
    pub extra_args: Vec<String>,
    pub model: Option<String>,
    pub provider: Option<String>,
}

pub struct EngineSettings {
    pub codex: Option<CodexSettings>,
    pub claude_cmd: Option<String>,
    pub claude_model: Option<String>,
    pub opencode_cmd: Option<String>,
    pub opencode_model: Option<String>,
    pub pi: Option<PiSettings>,
}

fn split_args(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

impl EngineSettings {
    pub fn load() -> Self {
        let codex = env::var("RELAY_CODEX_CMD").ok().map(|command| CodexSettings {
            command,
            extra_args: env::var("RELAY_CODEX_ARGS")
                .ok()
                .map(|s| split_args(&s))
                .unwrap_or_default(),
            title: env::var("RELAY_CODEX_TITLE").unwrap_or_else(|_| "codex".to_string()),
        });

        let claude_cmd = env::var("RELAY_CLAUDE_CMD").ok();
        let claude_model = env::var("RELAY_CLAUDE_MODEL").ok().filter(|s| !s.trim().is_empty());

        let opencode_cmd = env::var("RELAY_OPENCODE_CMD").ok();
        let opencode_model = env::var("RELAY_OPENCODE_MODEL").ok().filter(|s| !s.trim().is_empty());

        let pi = env::var("RELAY_PI_CMD").ok().map(|_| PiSettings {
            extra_args: env::var("RELAY_PI_ARGS")
                .ok()
                .map(|s| split_args(&s))
                .unwrap_or_default(),
            model: env::var("RELAY_PI_MODEL").ok().filter(|s| !s.trim().is_empty()),
            provider: env::var("RELAY_PI_PROVIDER").ok().filter(|s| !s.trim().is_empty()),
        });

        Self {
            codex,
            claude_cmd,
            claude_model,
            opencode_cmd,
            opencode_model,
            pi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn unset_engines_load_as_none() {
        for var in ["RELAY_CODEX_CMD", "RELAY_CLAUDE_CMD", "RELAY_OPENCODE_CMD", "RELAY_PI_CMD"] {
            env::remove_var(var);
        }
        let settings = EngineSettings::load();
        assert!(settings.codex.is_none());
        assert!(settings.claude_cmd.is_none());
        assert!(settings.opencode_cmd.is_none());
        assert!(settings.pi.is_none());
    }

    #[test]
    #[serial]
    fn codex_args_split_on_whitespace() {
        env::set_var("RELAY_CODEX_CMD", "codex");
        env::set_var("RELAY_CODEX_ARGS", "--full-auto --json");
        env::remove_var("RELAY_CODEX_TITLE");

        let settings = EngineSettings::load();
        let codex = settings.codex.unwrap();
        assert_eq!(codex.extra_args, vec!["--full-auto", "--json"]);
        assert_eq!(codex.title, "codex");

        env::remove_var("RELAY_CODEX_CMD");
        env::remove_var("RELAY_CODEX_ARGS");
    }
}
