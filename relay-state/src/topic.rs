//! Per-forum-topic session and context binding (spec.md §4.10), grounded on
//! `original_source/src/takopi/telegram/topic_state.py`'s `TopicStateStore`.

use std::collections::HashMap;
use std::path::Path;

use relay_core::{ResumeToken, RunContext};
use serde::{Deserialize, Serialize};

use crate::store::{JsonStateStore, VersionedState};

const VERSION: u32 = 1;

fn thread_key(chat_id: i64, thread_id: i64) -> String {
    format!("{chat_id}:{thread_id}")
}

fn normalize(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn context_from_state(state: Option<&ThreadContextDoc>) -> Option<RunContext> {
    let state = state?;
    let project = normalize(state.project.clone());
    let branch = normalize(state.branch.clone());
    if project.is_none() && branch.is_none() {
        return None;
    }
    Some(RunContext { project, branch })
}

fn context_to_state(context: &RunContext) -> Option<ThreadContextDoc> {
    let project = normalize(context.project.clone());
    let branch = normalize(context.branch.clone());
    if project.is_none() && branch.is_none() {
        return None;
    }
    Some(ThreadContextDoc { project, branch })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ThreadContextDoc {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionEntryDoc {
    resume: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ThreadDoc {
    #[serde(default)]
    context: Option<ThreadContextDoc>,
    #[serde(default)]
    sessions: HashMap<String, SessionEntryDoc>,
    #[serde(default)]
    topic_title: Option<String>,
    #[serde(default)]
    default_engine: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TopicStateDoc {
    version: u32,
    #[serde(default)]
    threads: HashMap<String, ThreadDoc>,
}

impl Default for TopicStateDoc {
    fn default() -> Self {
        Self { version: VERSION, threads: HashMap::new() }
    }
}

impl VersionedState for TopicStateDoc {
    const VERSION: u32 = VERSION;
    fn version(&self) -> u32 {
        self.version
    }
}

/// What callers get back for a known thread: everything the orchestrator
/// needs in one read (spec.md §4.10's `TopicThreadSnapshot`).
#[derive(Debug, Clone, Default)]
pub struct TopicThreadSnapshot {
    pub context: Option<RunContext>,
    pub sessions: HashMap<String, String>,
    pub topic_title: Option<String>,
    pub default_engine: Option<String>,
}

/// `(chat_id, thread_id) → {context?, sessions: engine → resume,
/// topic_title?, default_engine?}` (spec.md §4.10).
pub struct TopicStateStore {
    store: JsonStateStore<TopicStateDoc>,
}

impl TopicStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { store: JsonStateStore::new(path.as_ref().to_path_buf()) }
    }

    pub async fn get_thread(&self, chat_id: i64, thread_id: i64) -> Option<TopicThreadSnapshot> {
        let key = thread_key(chat_id, thread_id);
        self.store
            .read(|doc| doc.threads.get(&key).map(snapshot_of))
            .await
    }

    pub async fn get_context(&self, chat_id: i64, thread_id: i64) -> Option<RunContext> {
        let key = thread_key(chat_id, thread_id);
        self.store
            .read(|doc| context_from_state(doc.threads.get(&key).and_then(|t| t.context.as_ref())))
            .await
    }

    pub async fn set_context(
        &self,
        chat_id: i64,
        thread_id: i64,
        context: &RunContext,
        topic_title: Option<&str>,
    ) -> std::io::Result<()> {
        let key = thread_key(chat_id, thread_id);
        let context_doc = context_to_state(context);
        let topic_title = topic_title.map(str::to_string);
        self.store
            .write(|doc| {
                let thread = doc.threads.entry(key).or_default();
                thread.context = context_doc;
                if let Some(title) = topic_title {
                    thread.topic_title = Some(title);
                }
            })
            .await
    }

    pub async fn clear_context(&self, chat_id: i64, thread_id: i64) -> std::io::Result<()> {
        let key = thread_key(chat_id, thread_id);
        self.store
            .write(|doc| {
                if let Some(thread) = doc.threads.get_mut(&key) {
                    thread.context = None;
                }
            })
            .await
    }

    pub async fn get_session_resume(
        &self,
        chat_id: i64,
        thread_id: i64,
        engine: &str,
    ) -> Option<ResumeToken> {
        let key = thread_key(chat_id, thread_id);
        self.store
            .read(|doc| {
                let entry = doc.threads.get(&key)?.sessions.get(engine)?;
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
        thread_id: i64,
        token: &ResumeToken,
    ) -> std::io::Result<()> {
        let key = thread_key(chat_id, thread_id);
        let engine = token.engine.as_str().to_string();
        let resume = token.value.clone();
        self.store
            .write(|doc| {
                let thread = doc.threads.entry(key).or_default();
                thread.sessions.insert(engine, SessionEntryDoc { resume });
            })
            .await
    }

    pub async fn clear_sessions(&self, chat_id: i64, thread_id: i64) -> std::io::Result<()> {
        let key = thread_key(chat_id, thread_id);
        self.store
            .write(|doc| {
                if let Some(thread) = doc.threads.get_mut(&key) {
                    thread.sessions.clear();
                }
            })
            .await
    }

    pub async fn get_default_engine(&self, chat_id: i64, thread_id: i64) -> Option<String> {
        let key = thread_key(chat_id, thread_id);
        self.store
            .read(|doc| normalize(doc.threads.get(&key)?.default_engine.clone()))
            .await
    }

    pub async fn set_default_engine(
        &self,
        chat_id: i64,
        thread_id: i64,
        engine: Option<&str>,
    ) -> std::io::Result<()> {
        let key = thread_key(chat_id, thread_id);
        let engine = normalize(engine.map(str::to_string));
        self.store
            .write(|doc| {
                let thread = doc.threads.entry(key).or_default();
                thread.default_engine = engine;
            })
            .await
    }

    pub async fn clear_default_engine(&self, chat_id: i64, thread_id: i64) -> std::io::Result<()> {
        self.set_default_engine(chat_id, thread_id, None).await
    }

    pub async fn delete_thread(&self, chat_id: i64, thread_id: i64) -> std::io::Result<()> {
        let key = thread_key(chat_id, thread_id);
        self.store
            .write(|doc| {
                doc.threads.remove(&key);
            })
            .await
    }

    /// Finds a thread in `chat_id` already bound to the same project and
    /// branch as `context`, so a `/project` switch reuses an existing topic
    /// instead of minting a duplicate (spec.md §4.10).
    pub async fn find_thread_for_context(&self, chat_id: i64, context: &RunContext) -> Option<i64> {
        let target_project = normalize(context.project.clone());
        let target_branch = normalize(context.branch.clone());
        self.store
            .read(|doc| {
                for (raw_key, thread) in &doc.threads {
                    let Some((key_chat, key_thread)) = raw_key.split_once(':') else {
                        continue;
                    };
                    if key_chat.parse::<i64>() != Ok(chat_id) {
                        continue;
                    }
                    let Some(parsed) = context_from_state(thread.context.as_ref()) else {
                        continue;
                    };
                    if parsed.project != target_project || parsed.branch != target_branch {
                        continue;
                    }
                    if let Ok(thread_id) = key_thread.parse::<i64>() {
                        return Some(thread_id);
                    }
                }
                None
            })
            .await
    }
}

fn snapshot_of(thread: &ThreadDoc) -> TopicThreadSnapshot {
    let sessions = thread
        .sessions
        .iter()
        .filter(|(_, entry)| !entry.resume.is_empty())
        .map(|(engine, entry)| (engine.clone(), entry.resume.clone()))
        .collect();
    TopicThreadSnapshot {
        context: context_from_state(thread.context.as_ref()),
        sessions,
        topic_title: thread.topic_title.clone(),
        default_engine: normalize(thread.default_engine.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_session_resume_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = TopicStateStore::new(dir.path().join("topics.json"));
        let token = ResumeToken::new("codex", "abc123");
        store.set_session_resume(1, 2, &token).await.unwrap();

        let got = store.get_session_resume(1, 2, "codex").await;
        assert_eq!(got, Some(token));
    }

    #[tokio::test]
    async fn context_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = TopicStateStore::new(dir.path().join("topics.json"));
        let context = RunContext { project: Some("myapp".into()), branch: Some("main".into()) };
        store.set_context(1, 2, &context, Some("my-topic")).await.unwrap();

        let got = store.get_context(1, 2).await;
        assert_eq!(got, Some(context));

        store.clear_context(1, 2).await.unwrap();
        assert_eq!(store.get_context(1, 2).await, None);
    }

    #[tokio::test]
    async fn find_thread_for_context_matches_project_and_branch() {
        let dir = tempfile::tempdir().unwrap();
        let store = TopicStateStore::new(dir.path().join("topics.json"));
        let context = RunContext { project: Some("myapp".into()), branch: None };
        store.set_context(1, 42, &context, None).await.unwrap();

        let found = store.find_thread_for_context(1, &context).await;
        assert_eq!(found, Some(42));

        let other_chat = store.find_thread_for_context(99, &context).await;
        assert_eq!(other_chat, None);
    }

    #[tokio::test]
    async fn unknown_thread_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TopicStateStore::new(dir.path().join("topics.json"));
        assert!(store.get_thread(1, 2).await.is_none());
    }
}
