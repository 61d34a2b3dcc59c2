//! Wires an `Orchestrator` to Telegram's long-poll loop: dispatches each
//! incoming message/callback, answers `/cancel`, and persists resumes
//! (spec.md §4.8, §4.10). Grounded on
//! `original_source/src/takopi/telegram/loop.py`'s update dispatch. A
//! message inside a forum topic is routed through `TopicStateStore`
//! (session/default-engine/context partitioned per `(chat_id, thread_id)`,
//! matching spec.md §4.10's topic state model); a message outside a topic
//! falls back to the chat-scoped `ChatSessionStore`. Topic auto-creation
//! (`relay_telegram::forum`'s `createForumTopic`/rename wizard) stays out of
//! this binary's default wiring — see `DESIGN.md`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_core::{EngineId, MessageRef, ResumeToken};
use relay_orchestrator::resume::resolve_resume;
use relay_orchestrator::{handle_callback_cancel, handle_reply_cancel, IncomingPrompt, Orchestrator, ResumeSink};
use relay_session::ResumeSyntax;
use relay_state::{ChatSessionStore, TopicStateStore};
use relay_telegram::commands::extract_engine_override;
use relay_telegram::update::{IncomingCallbackQuery, IncomingMessage, IncomingUpdate};
use relay_telegram::TelegramClient;

/// Persists the resume a run publishes to the chat-scoped store, keyed by
/// the chat and (in groups) the sender — see `ChatSessionStore`.
struct ChatResumeSink {
    store: Arc<ChatSessionStore>,
    chat_id: i64,
    owner_id: Option<i64>,
}

#[async_trait]
impl ResumeSink for ChatResumeSink {
    async fn note_resume(&self, token: &ResumeToken) {
        if let Err(err) = self.store.set_session_resume(self.chat_id, self.owner_id, token).await {
            warn!(%err, "app.persist_resume_failed");
        }
    }
}

/// Persists the resume a run publishes to the topic-scoped store, keyed by
/// the `(chat_id, thread_id)` the message arrived on — see
/// `TopicStateStore`.
struct TopicResumeSink {
    store: Arc<TopicStateStore>,
    chat_id: i64,
    thread_id: i64,
}

#[async_trait]
impl ResumeSink for TopicResumeSink {
    async fn note_resume(&self, token: &ResumeToken) {
        if let Err(err) = self.store.set_session_resume(self.chat_id, self.thread_id, token).await {
            warn!(%err, "app.persist_topic_resume_failed");
        }
    }
}

/// Drains `rx` until `cancel` fires, dispatching each update to the
/// orchestrator. Messages are handled on their own spawned task so a slow
/// run never blocks the poll loop or a concurrent chat's messages.
pub async fn run_dispatch_loop(
    orchestrator: Arc<Orchestrator>,
    client: Arc<TelegramClient>,
    chat_sessions: Arc<ChatSessionStore>,
    topics: Arc<TopicStateStore>,
    resume_syntaxes: Arc<HashMap<EngineId, Arc<dyn ResumeSyntax>>>,
    fallback_engine: EngineId,
    mut rx: mpsc::Receiver<IncomingUpdate>,
    cancel: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => break,
            update = rx.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };

        match update {
            IncomingUpdate::Message(msg) => {
                let orchestrator = orchestrator.clone();
                let chat_sessions = chat_sessions.clone();
                let topics = topics.clone();
                let resume_syntaxes = resume_syntaxes.clone();
                let fallback_engine = fallback_engine.clone();
                tokio::spawn(async move {
                    handle_message(orchestrator, chat_sessions, topics, resume_syntaxes, fallback_engine, msg).await;
                });
            }
            IncomingUpdate::Callback(query) => {
                let orchestrator = orchestrator.clone();
                let client = client.clone();
                tokio::spawn(async move {
                    handle_callback(orchestrator, client, query).await;
                });
            }
        }
    }
    info!("app.dispatch_loop_stopped");
}

async fn handle_message(
    orchestrator: Arc<Orchestrator>,
    chat_sessions: Arc<ChatSessionStore>,
    topics: Arc<TopicStateStore>,
    resume_syntaxes: Arc<HashMap<EngineId, Arc<dyn ResumeSyntax>>>,
    fallback_engine: EngineId,
    msg: IncomingMessage,
) {
    if let Some(reply_to) = msg.reply_to_message_id {
        let progress_ref = MessageRef::new(msg.chat_id, reply_to, msg.thread_id);
        if handle_reply_cancel(orchestrator.running(), &msg.text, progress_ref).await {
            return;
        }
    }

    let (engine_override, _) = extract_engine_override(&msg.text);
    let thread_id = msg.thread_id.map(i64::from);

    // Messages inside a forum topic are partitioned by `(chat_id,
    // thread_id)` instead of by chat/sender, so parallel topics never
    // share a session, default engine, or project/branch context.
    let thread_default_engine = match thread_id {
        Some(thread_id) => topics.get_default_engine(msg.chat_id, thread_id).await.map(EngineId::from),
        None => None,
    };
    let candidate_engine = engine_override
        .clone()
        .or_else(|| thread_default_engine.clone())
        .unwrap_or_else(|| fallback_engine.clone());

    let syntaxes: Vec<&dyn ResumeSyntax> = resume_syntaxes.values().map(|s| s.as_ref()).collect();
    let inline_resume = resolve_resume(&msg.text, msg.reply_to_text.as_deref(), &candidate_engine, &syntaxes);

    let context;
    let resume_override;
    let resume_sink: Arc<dyn ResumeSink>;
    match thread_id {
        Some(thread_id) => {
            resume_override = match inline_resume {
                Some(resume) => Some(resume),
                None => topics.get_session_resume(msg.chat_id, thread_id, candidate_engine.as_str()).await,
            };
            context = topics.get_context(msg.chat_id, thread_id).await;
            resume_sink = Arc::new(TopicResumeSink { store: topics, chat_id: msg.chat_id, thread_id });
        }
        None => {
            resume_override = match inline_resume {
                Some(resume) => Some(resume),
                None => chat_sessions.get_session_resume(msg.chat_id, msg.sender_id, candidate_engine.as_str()).await,
            };
            context = None;
            resume_sink = Arc::new(ChatResumeSink { store: chat_sessions, chat_id: msg.chat_id, owner_id: msg.sender_id });
        }
    };

    let prompt = IncomingPrompt {
        chat_id: msg.chat_id,
        thread_id: msg.thread_id,
        reply_to_message_id: msg.message_id,
        text: msg.text,
        reply_to_text: msg.reply_to_text,
        context,
        engine_override,
        thread_default_engine,
        resume_override,
        resume_sink: Some(resume_sink),
    };

    if let Err(err) = orchestrator.handle_message(prompt).await {
        warn!(%err, "app.handle_message_failed");
    }
}

async fn handle_callback(orchestrator: Arc<Orchestrator>, client: Arc<TelegramClient>, query: IncomingCallbackQuery) {
    if let Some(data) = &query.data {
        let progress_ref = MessageRef::new(query.chat_id, query.message_id, None);
        handle_callback_cancel(orchestrator.running(), data, progress_ref).await;
    }
    let _ = client.answer_callback_query(query.callback_query_id.clone()).await;
}
