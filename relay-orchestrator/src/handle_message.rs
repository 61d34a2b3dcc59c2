//! The handle-message loop (spec.md §4.8): sends a progress message,
//! registers a running task, drives the engine while coalescing live
//! progress edits, and delivers a final rendered message. Grounded on
//! `original_source/src/takopi/runner_bridge.py`'s `handle_message`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use relay_core::{EngineId, Event, MessageRef, RelayError, ResumeToken, Result, RunContext};
use relay_progress::{
    render_final, render_progress, truncate_preserving_resume_line, EditSink, ProgressCoalescer, ProgressTracker, RunClock,
};
use relay_session::{ResumeSyntax, SessionLockRegistry};
use relay_telegram::{SendOptions, TelegramClient};

use crate::engines::EngineRegistry;
use crate::resume::{resolve_resume, strip_resume_and_engine_lines};
use crate::running::{RunningTask, RunningTasks};

/// Tunables spec.md §4.8 leaves to the caller: the coalescer's debounce
/// window, whether the final message should always be a fresh notifying
/// send (vs. edited in place when it fits), whether the resume line is
/// shown at all (chat-stateful modes may suppress it), and Telegram's edit
/// size budget.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub debounce: Duration,
    pub final_notify: bool,
    pub show_resume_line: bool,
    pub edit_budget_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            final_notify: false,
            show_resume_line: true,
            edit_budget_chars: 4096,
        }
    }
}

/// Persists a newly-discovered resume token once the run's `Started` event
/// reveals it (spec.md §4.10). Implemented by callers wrapping
/// `relay_state::TopicStateStore`/`ChatSessionStore` bound to the message's
/// chat/thread/owner — `relay-orchestrator` doesn't depend on `relay-state`
/// directly so it stays agnostic of which store shape applies.
#[async_trait]
pub trait ResumeSink: Send + Sync {
    async fn note_resume(&self, token: &ResumeToken);
}

/// One incoming prompt ready to be run, after command/engine-override/
/// resume parsing at the call site (spec.md §6).
pub struct IncomingPrompt {
    pub chat_id: i64,
    pub thread_id: Option<i32>,
    pub reply_to_message_id: i32,
    pub text: String,
    pub reply_to_text: Option<String>,
    pub context: Option<RunContext>,
    pub engine_override: Option<EngineId>,
    pub thread_default_engine: Option<EngineId>,
    pub resume_override: Option<ResumeToken>,
    pub resume_sink: Option<Arc<dyn ResumeSink>>,
}

/// Summary of one completed `handle_message` call, for callers that need to
/// persist final state (e.g. clearing a topic's remembered session on
/// error) outside the run itself.
#[derive(Debug, Clone)]
pub struct HandleMessageOutcome {
    pub engine: EngineId,
    pub resume: Option<ResumeToken>,
    pub ok: bool,
    pub cancelled: bool,
}

struct TelegramEditSink {
    client: Arc<TelegramClient>,
    chat_id: i64,
    message_id: i32,
}

#[async_trait]
impl EditSink for TelegramEditSink {
    async fn edit(&self, text: String) {
        if let Err(err) = self.client.edit_message_text(self.chat_id, self.message_id, text, false).await {
            warn!(chat_id = self.chat_id, message_id = self.message_id, %err, "orchestrator.progress_edit_failed");
        }
    }
}

/// Owns everything one `handle_message` call needs: the Telegram client,
/// the configured engines, the session lock registry, the running-task
/// registry `/cancel` looks things up through, and the resume-line
/// syntaxes used to parse and render session ids.
pub struct Orchestrator {
    client: Arc<TelegramClient>,
    engines: Arc<EngineRegistry>,
    locks: Arc<SessionLockRegistry>,
    running: Arc<RunningTasks>,
    resume_syntaxes: Arc<HashMap<EngineId, Arc<dyn ResumeSyntax>>>,
    config: OrchestratorConfig,
    scheduler: tokio::sync::OnceCell<Arc<relay_session::ThreadScheduler>>,
}

impl Orchestrator {
    pub fn new(
        client: Arc<TelegramClient>,
        engines: Arc<EngineRegistry>,
        locks: Arc<SessionLockRegistry>,
        resume_syntaxes: HashMap<EngineId, Arc<dyn ResumeSyntax>>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            engines,
            locks,
            running: RunningTasks::new(),
            resume_syntaxes: Arc::new(resume_syntaxes),
            config,
            scheduler: tokio::sync::OnceCell::new(),
        })
    }

    pub fn running(&self) -> &Arc<RunningTasks> {
        &self.running
    }

    /// Attaches the thread scheduler once constructed (spec.md §4.9). Main
    /// wiring builds the `Orchestrator` first, then a `SchedulerBridge`
    /// around a weak reference to it, then the scheduler around that
    /// bridge, and finally calls this to close the loop without a strong
    /// reference cycle.
    pub fn attach_scheduler(&self, scheduler: Arc<relay_session::ThreadScheduler>) {
        let _ = self.scheduler.set(scheduler);
    }

    pub fn scheduler(&self) -> Option<&Arc<relay_session::ThreadScheduler>> {
        self.scheduler.get()
    }

    pub async fn handle_cancel(&self, progress_ref: MessageRef) -> bool {
        self.running.request_cancel(&progress_ref).await
    }

    fn syntax_for(&self, engine: &EngineId) -> Option<&Arc<dyn ResumeSyntax>> {
        self.resume_syntaxes.get(engine)
    }

    fn format_resume_line(&self, token: &ResumeToken) -> Option<String> {
        if !self.config.show_resume_line {
            return None;
        }
        self.syntax_for(&token.engine).map(|s| s.format_resume(token))
    }

    /// Runs spec.md §4.8's 8 numbered steps for one prompt, end to end.
    pub async fn handle_message(&self, prompt: IncomingPrompt) -> Result<HandleMessageOutcome> {
        let engine = self.engines.resolve(prompt.engine_override.as_ref(), prompt.thread_default_engine.as_ref());

        let Some(runner) = self.engines.get(&engine) else {
            let _ = self
                .client
                .send_message(
                    prompt.chat_id,
                    format!("unknown engine `{engine}`"),
                    SendOptions {
                        reply_to_message_id: Some(prompt.reply_to_message_id),
                        thread_id: prompt.thread_id,
                        ..Default::default()
                    },
                )
                .await;
            return Ok(HandleMessageOutcome { engine, resume: None, ok: false, cancelled: false });
        };

        let syntaxes: Vec<&dyn ResumeSyntax> = self.resume_syntaxes.values().map(|s| s.as_ref()).collect();
        let resume = prompt
            .resume_override
            .clone()
            .or_else(|| resolve_resume(&prompt.text, prompt.reply_to_text.as_deref(), &engine, &syntaxes));
        let stripped_prompt = strip_resume_and_engine_lines(&prompt.text, &syntaxes);

        // Step 1: send the initial progress message as a reply, quiet.
        let context_line = prompt.context.as_ref().and_then(RunContext::context_line);
        let mut tracker = ProgressTracker::new(engine.as_str());
        tracker.set_resume(resume.clone());
        let initial_resume_line = tracker.resume().and_then(|r| self.format_resume_line(r));
        let initial_snapshot = tracker.snapshot(context_line.clone(), initial_resume_line);
        let initial_text = render_progress(&initial_snapshot, Duration::ZERO);

        let sent = self
            .client
            .send_message(
                prompt.chat_id,
                initial_text,
                SendOptions {
                    reply_to_message_id: Some(prompt.reply_to_message_id),
                    disable_notification: true,
                    thread_id: prompt.thread_id,
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| RelayError::State(format!("failed to send initial progress message: {err}")))?;

        let progress_ref = MessageRef::new(prompt.chat_id, sent.message_id, prompt.thread_id);

        // Step 2: register the running task so /cancel can find it.
        let task = RunningTask::new(prompt.context.clone());
        self.running.register(progress_ref, task.clone()).await;

        // Step 3: start the runner and the coalescer concurrently.
        let tracker = Arc::new(StdMutex::new(tracker));
        let clock = Arc::new(RunClock::start());
        let sink: Arc<dyn EditSink> = Arc::new(TelegramEditSink {
            client: self.client.clone(),
            chat_id: prompt.chat_id,
            message_id: sent.message_id,
        });

        let render_tracker = tracker.clone();
        let render_syntaxes = self.resume_syntaxes.clone();
        let render_context_line = context_line.clone();
        let render_clock = clock.clone();
        let show_resume_line = self.config.show_resume_line;
        let render_budget = self.config.edit_budget_chars;
        let coalescer = ProgressCoalescer::spawn(sink, self.config.debounce, move || {
            let t = render_tracker.lock().expect("progress tracker poisoned");
            let resume_line = if show_resume_line {
                t.resume().and_then(|r| render_syntaxes.get(&r.engine).map(|s| s.format_resume(r)))
            } else {
                None
            };
            let snapshot = t.snapshot(render_context_line.clone(), resume_line);
            let rendered = render_progress(&snapshot, render_clock.elapsed());
            truncate_preserving_resume_line(&rendered, render_budget)
        });

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let locks = self.locks.clone();
        let run_cancel = task.cancel.clone();
        let run_resume = resume.clone();
        let run_handle = tokio::spawn(async move { runner.run_locked(locks, stripped_prompt, run_resume, tx, run_cancel).await });

        // Step 4: consume events, capturing the terminal outcome.
        let mut final_ok = false;
        let mut final_answer = String::new();
        let mut final_error: Option<String> = None;
        let mut final_resume: Option<ResumeToken> = None;
        let mut saw_completed = false;

        while let Some(event) = rx.recv().await {
            if let Event::Started { resume: started_resume, .. } = &event {
                task.publish_resume(started_resume.clone());
                tracker.lock().expect("progress tracker poisoned").set_resume(Some(started_resume.clone()));
                if let Some(scheduler) = self.scheduler() {
                    scheduler.note_thread_known(started_resume, task.done.clone()).await;
                }
                if let Some(sink) = &prompt.resume_sink {
                    sink.note_resume(started_resume).await;
                }
            }

            let changed = tracker.lock().expect("progress tracker poisoned").note_event(&event);
            if changed {
                coalescer.bump();
            }

            if let Event::Completed { ok, answer, resume: completed_resume, error, .. } = event {
                final_ok = ok;
                final_answer = answer;
                final_error = error;
                final_resume = completed_resume;
                saw_completed = true;
            }
        }

        // `run_locked` only fails without ever sending a `Completed` event
        // (a session-mismatch/wrong-engine error, or a panicked task); when
        // that happens surface it the same way a `Completed{ok: false, ..}`
        // would have, so the user still gets a rendered error instead of a
        // bare "error" status with no detail.
        match run_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if !saw_completed {
                    final_ok = false;
                    final_error = Some(err.to_string());
                }
            }
            Err(join_err) => {
                if !saw_completed {
                    final_ok = false;
                    final_error = Some(format!("runner task panicked: {join_err}"));
                }
            }
        }

        // Step 5: cancellation is a distinct terminal state, observed once
        // the runner's own cleanup has already torn the subprocess down.
        let cancelled = task.cancel.is_cancelled();

        // Step 6: render the final message from a fresh snapshot.
        let elapsed = clock.elapsed();
        let status = if cancelled {
            "cancelled"
        } else if !final_ok {
            "error"
        } else {
            "done"
        };

        let mut answer_text = final_answer;
        if status == "error" && answer_text.trim().is_empty() {
            if let Some(err) = &final_error {
                answer_text = err.clone();
            }
        }

        let resume_line = final_resume.as_ref().and_then(|r| self.format_resume_line(r));
        let final_snapshot = tracker.lock().expect("progress tracker poisoned").snapshot(context_line, resume_line);
        let final_text = render_final(&final_snapshot, elapsed, status, &answer_text);
        let final_text = truncate_preserving_resume_line(&final_text, self.config.edit_budget_chars);

        // Step 7: deliver. An edit in place if it fits and the caller
        // wants a quiet finish; otherwise a fresh notifying send that
        // replaces (and so deletes) the progress message.
        coalescer.stop();
        if final_text.chars().count() <= self.config.edit_budget_chars && !self.config.final_notify {
            let _ = self.client.edit_message_text(prompt.chat_id, sent.message_id, final_text, true).await;
        } else {
            let _ = self
                .client
                .send_message(
                    prompt.chat_id,
                    final_text,
                    SendOptions {
                        reply_to_message_id: Some(prompt.reply_to_message_id),
                        thread_id: prompt.thread_id,
                        replace_message_id: Some(sent.message_id),
                        ..Default::default()
                    },
                )
                .await;
        }

        // Step 8: unregister and signal completion to anything waiting on
        // this session (the thread scheduler's busy_until, a queued job).
        self.running.unregister(&progress_ref).await;
        task.done.set();

        Ok(HandleMessageOutcome {
            engine,
            resume: final_resume,
            ok: final_ok && saw_completed,
            cancelled,
        })
    }
}
