//! Configuration loaded from environment variables, mirroring the
//! teacher's `BotConfig::load`/`validate` split (spec.md §2.3).

mod cli;
mod engines;
mod projects;

pub use cli::{Cli, Commands};
pub use engines::{CodexSettings, EngineSettings, PiSettings};
pub use projects::load_projects_config;

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use relay_core::{EngineId, ProjectsConfig, RelayError, Result};

/// Process-wide configuration: the values `relay`'s binary needs to build
/// a `relay_telegram::TelegramClient`, a `relay_orchestrator::EngineRegistry`,
/// and the two `relay_state` stores.
pub struct RelayConfig {
    pub bot_token: String,
    /// Telegram Bot API base URL override. Env: `RELAY_API_URL` or
    /// `TELOXIDE_API_URL` (fallback, matching the teacher's alias).
    pub api_base_url: Option<String>,
    pub log_file: PathBuf,
    /// Minimum interval between edits of the same progress message. Env:
    /// `RELAY_EDIT_INTERVAL_SECS`, default 2.
    pub edit_interval: Duration,
    pub default_engine: EngineId,
    pub engines: EngineSettings,
    pub projects: ProjectsConfig,
    pub topic_state_path: PathBuf,
    pub chat_session_state_path: PathBuf,
}

impl RelayConfig {
    /// Loads config from environment variables. If `token` is provided it
    /// overrides `RELAY_BOT_TOKEN`.
    pub fn load(token: Option<String>) -> Result<Self> {
        let bot_token = match token {
            Some(t) => t,
            None => env::var("RELAY_BOT_TOKEN")
                .map_err(|_| RelayError::Config("RELAY_BOT_TOKEN not set".to_string()))?,
        };

        let api_base_url = env::var("RELAY_API_URL")
            .or_else(|_| env::var("TELOXIDE_API_URL"))
            .ok();

        let log_file = env::var("RELAY_LOG_FILE")
            .unwrap_or_else(|_| "logs/relay.log".to_string())
            .into();

        let edit_interval_secs: u64 = env::var("RELAY_EDIT_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);
        let edit_interval = Duration::from_secs(edit_interval_secs);

        let default_engine = env::var("RELAY_DEFAULT_ENGINE")
            .unwrap_or_else(|_| "codex".to_string())
            .into();

        let engines = EngineSettings::load();

        let projects = load_projects_config()?;

        let topic_state_path = env::var("RELAY_TOPIC_STATE_PATH")
            .unwrap_or_else(|_| "state/topics.json".to_string())
            .into();
        let chat_session_state_path = env::var("RELAY_CHAT_SESSION_STATE_PATH")
            .unwrap_or_else(|_| "state/chats.json".to_string())
            .into();

        Ok(Self {
            bot_token,
            api_base_url,
            log_file,
            edit_interval,
            default_engine,
            engines,
            projects,
            topic_state_path,
            chat_session_state_path,
        })
    }

    /// Cross-field checks that must pass before the runtime starts
    /// spawning subprocesses or talking to Telegram.
    pub fn validate(&self) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            return Err(RelayError::Config("RELAY_BOT_TOKEN is empty".to_string()));
        }
        if let Some(url) = &self.api_base_url {
            if url::Url::parse(url).is_err() {
                return Err(RelayError::Config(format!(
                    "RELAY_API_URL (or TELOXIDE_API_URL) is set but not a valid URL: {url}"
                )));
            }
        }
        if self.engines.codex.is_none() && self.engines.claude_cmd.is_none()
            && self.engines.opencode_cmd.is_none() && self.engines.pi.is_none()
        {
            return Err(RelayError::Config(
                "no engine is configured (set at least one of RELAY_CODEX_CMD, RELAY_CLAUDE_CMD, RELAY_OPENCODE_CMD, RELAY_PI_CMD)".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "RELAY_BOT_TOKEN",
            "RELAY_API_URL",
            "TELOXIDE_API_URL",
            "RELAY_LOG_FILE",
            "RELAY_EDIT_INTERVAL_SECS",
            "RELAY_DEFAULT_ENGINE",
            "RELAY_CODEX_CMD",
            "RELAY_CODEX_ARGS",
            "RELAY_CODEX_TITLE",
            "RELAY_CLAUDE_CMD",
            "RELAY_CLAUDE_MODEL",
            "RELAY_OPENCODE_CMD",
            "RELAY_OPENCODE_MODEL",
            "RELAY_PI_ARGS",
            "RELAY_PI_MODEL",
            "RELAY_PI_PROVIDER",
            "RELAY_PROJECTS",
            "RELAY_DEFAULT_PROJECT",
            "RELAY_TOPIC_STATE_PATH",
            "RELAY_CHAT_SESSION_STATE_PATH",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn load_with_defaults() {
        clear_env();
        env::set_var("RELAY_BOT_TOKEN", "test-token");
        env::set_var("RELAY_CODEX_CMD", "codex");

        let config = RelayConfig::load(None).unwrap();

        assert_eq!(config.bot_token, "test-token");
        assert!(config.api_base_url.is_none());
        assert_eq!(config.log_file, PathBuf::from("logs/relay.log"));
        assert_eq!(config.edit_interval, Duration::from_secs(2));
        assert_eq!(config.default_engine, EngineId::new("codex"));
        assert_eq!(config.topic_state_path, PathBuf::from("state/topics.json"));
    }

    #[test]
    #[serial]
    fn token_argument_overrides_env() {
        clear_env();
        env::set_var("RELAY_BOT_TOKEN", "from-env");
        env::set_var("RELAY_CODEX_CMD", "codex");

        let config = RelayConfig::load(Some("from-arg".to_string())).unwrap();
        assert_eq!(config.bot_token, "from-arg");
    }

    #[test]
    #[serial]
    fn teloxide_api_url_is_accepted_as_a_fallback() {
        clear_env();
        env::set_var("RELAY_BOT_TOKEN", "test-token");
        env::set_var("RELAY_CODEX_CMD", "codex");
        env::set_var("TELOXIDE_API_URL", "https://example.test/bot");

        let config = RelayConfig::load(None).unwrap();
        assert_eq!(config.api_base_url.as_deref(), Some("https://example.test/bot"));
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn validate_rejects_malformed_api_url() {
        clear_env();
        env::set_var("RELAY_BOT_TOKEN", "test-token");
        env::set_var("RELAY_CODEX_CMD", "codex");
        env::set_var("RELAY_API_URL", "not a url");

        let config = RelayConfig::load(None).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn validate_rejects_missing_bot_token() {
        clear_env();
        env::set_var("RELAY_CODEX_CMD", "codex");

        let err = RelayConfig::load(None).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    #[serial]
    fn validate_rejects_no_configured_engine() {
        clear_env();
        env::set_var("RELAY_BOT_TOKEN", "test-token");

        let config = RelayConfig::load(None).unwrap();
        assert!(config.validate().is_err());
    }
}
