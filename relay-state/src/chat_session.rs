//! Chat-scoped (outside any topic) session bindings (spec.md §4.10): keyed
//! by user in group chats — several people can DM the same group without
//! sharing sessions — and by chat in private ones, where the chat id
//! already uniquely identifies the user. No direct original_source
//! counterpart (`topic_state.py` only covers the topic-bound case); this is
//! the non-topic sibling the prose in spec.md §4.10 also calls for,
//! structured the same way.

use std::collections::HashMap;
use std::path::Path;

use relay_core::ResumeToken;
use serde::{Deserialize, Serialize};

use crate::store::{JsonStateStore, VersionedState};

const VERSION: u32 = 1;

fn is_group(chat_id: i64) -> bool {
    chat_id < 0
}

fn session_key(chat_id: i64, owner_id: Option<i64>) -> String {
    if is_group(chat_id) {
        owner_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| chat_id.to_string())
    } else {
        chat_id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionEntryDoc {
    resume: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ChatEntryDoc {
    #[serde(default)]
    sessions: HashMap<String, SessionEntryDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatSessionDoc {
    version: u32,
    #[serde(default)]
    chats: HashMap<String, ChatEntryDoc>,
}

impl Default for ChatSessionDoc {
    fn default() -> Self {
        Self { version: VERSION, chats: HashMap::new() }
    }
}

impl VersionedState for ChatSessionDoc {
    const VERSION: u32 = VERSION;
    fn version(&self) -> u32 {
        self.version
    }
}

/// `(chat_id, owner_id?) → sessions: engine → resume` (spec.md §4.10),
/// for resumes that aren't bound to any forum topic.
pub struct ChatSessionStore {
    store: JsonStateStore<ChatSessionDoc>,
}

impl ChatSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { store: JsonStateStore::new(path.as_ref().to_path_buf()) }
    }

    pub async fn get_session_resume(
        &self,
        chat_id: i64,
        owner_id: Option<i64>,
        engine: &str,
    ) -> Option<ResumeToken> {
        let key = session_key(chat_id, owner_id);
        self.store
            .read(|doc| {
                let entry = doc.chats.get(&key)?.sessions.get(engine)?;
                if entry.resume.is_empty() {
                    return None;
                }
                Some(ResumeToken::new(engine, entry.resume.clone()))
            })
            .await
    }

    pub async fn set_session_resume(
        &self,
        chat_id: i64,
        owner_id: Option<i64>,
        token: &ResumeToken,
    ) -> std::io::Result<()> {
        let key = session_key(chat_id, owner_id);
        let engine = token.engine.as_str().to_string();
        let resume = token.value.clone();
        self.store
            .write(|doc| {
                let chat = doc.chats.entry(key).or_default();
                chat.sessions.insert(engine, SessionEntryDoc { resume });
            })
            .await
    }

    pub async fn clear_sessions(&self, chat_id: i64, owner_id: Option<i64>) -> std::io::Result<()> {
        let key = session_key(chat_id, owner_id);
        self.store
            .write(|doc| {
                if let Some(chat) = doc.chats.get_mut(&key) {
                    chat.sessions.clear();
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn private_chat_keys_by_chat_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatSessionStore::new(dir.path().join("chats.json"));
        let token = ResumeToken::new("codex", "abc");
        store.set_session_resume(555, None, &token).await.unwrap();

        assert_eq!(store.get_session_resume(555, Some(999), "codex").await, Some(token.clone()));
        assert_eq!(store.get_session_resume(555, None, "codex").await, Some(token));
    }

    #[tokio::test]
    async fn group_chat_keys_by_owner_not_chat() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatSessionStore::new(dir.path().join("chats.json"));
        let token = ResumeToken::new("codex", "abc");
        store.set_session_resume(-100, Some(42), &token).await.unwrap();

        // Same user, different group: still resolves.
        assert_eq!(store.get_session_resume(-200, Some(42), "codex").await, Some(token));
        // Different user, same group: does not.
        assert_eq!(store.get_session_resume(-100, Some(7), "codex").await, None);
    }
}
