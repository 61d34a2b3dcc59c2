//! Per-session FIFO serialization for user-supplied resume targets
//! (spec.md §4.9), grounded on `original_source/src/takopi/scheduler.py`'s
//! `ThreadScheduler`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::instrument;

use relay_core::{ResumeToken, RunContext};

use crate::done_event::DoneEvent;

/// One queued follow-up prompt bound to an already-known session.
#[derive(Debug, Clone)]
pub struct ThreadJob {
    pub chat_id: i64,
    pub user_msg_id: i32,
    pub text: String,
    pub resume: ResumeToken,
    pub context: Option<RunContext>,
}

/// Runs one [`ThreadJob`] to completion. Implemented by the orchestrator;
/// kept as a trait here so `relay-session` doesn't depend on it.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: ThreadJob);
}

struct SchedulerState {
    pending_by_thread: HashMap<String, VecDeque<ThreadJob>>,
    active_threads: HashSet<String>,
    busy_until: HashMap<String, Arc<DoneEvent>>,
}

/// Serializes prompts addressed to the same session: a reply arriving while
/// a run on that session is still executing queues behind it instead of
/// racing it (spec.md §4.9).
pub struct ThreadScheduler {
    state: Mutex<SchedulerState>,
    run_job: Arc<dyn JobRunner>,
}

fn thread_key(token: &ResumeToken) -> String {
    format!("{}:{}", token.engine, token.value)
}

impl ThreadScheduler {
    pub fn new(run_job: Arc<dyn JobRunner>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SchedulerState {
                pending_by_thread: HashMap::new(),
                active_threads: HashSet::new(),
                busy_until: HashMap::new(),
            }),
            run_job,
        })
    }

    /// Called by the orchestrator when it first learns a session id, so
    /// follow-ups queued on that session know when the in-flight run
    /// completes.
    #[instrument(skip(self, done))]
    pub async fn note_thread_known(self: &Arc<Self>, token: &ResumeToken, done: Arc<DoneEvent>) {
        let key = thread_key(token);
        {
            let mut state = self.state.lock().await;
            let replace = match state.busy_until.get(&key) {
                Some(current) => current.is_set(),
                None => true,
            };
            if replace {
                state.busy_until.insert(key.clone(), done.clone());
            }
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.clear_busy(key, done).await;
        });
    }

    async fn clear_busy(self: Arc<Self>, key: String, done: Arc<DoneEvent>) {
        done.wait().await;
        let mut state = self.state.lock().await;
        if let Some(current) = state.busy_until.get(&key) {
            if Arc::ptr_eq(current, &done) {
                state.busy_until.remove(&key);
            }
        }
    }

    pub async fn enqueue(self: &Arc<Self>, job: ThreadJob) {
        let key = thread_key(&job.resume);
        let start_worker = {
            let mut state = self.state.lock().await;
            let queue = state.pending_by_thread.entry(key.clone()).or_default();
            queue.push_back(job);
            if state.active_threads.contains(&key) {
                false
            } else {
                state.active_threads.insert(key.clone());
                true
            }
        };
        if start_worker {
            let this = self.clone();
            tokio::spawn(async move {
                this.thread_worker(key).await;
            });
        }
    }

    pub async fn enqueue_resume(
        self: &Arc<Self>,
        chat_id: i64,
        user_msg_id: i32,
        text: String,
        resume: ResumeToken,
        context: Option<RunContext>,
    ) {
        self.enqueue(ThreadJob {
            chat_id,
            user_msg_id,
            text,
            resume,
            context,
        })
        .await;
    }

    async fn thread_worker(self: Arc<Self>, key: String) {
        loop {
            let (job, done) = {
                let mut state = self.state.lock().await;
                let Some(queue) = state.pending_by_thread.get_mut(&key) else {
                    state.active_threads.remove(&key);
                    return;
                };
                let Some(job) = queue.pop_front() else {
                    state.pending_by_thread.remove(&key);
                    state.active_threads.remove(&key);
                    return;
                };
                if queue.is_empty() {
                    state.pending_by_thread.remove(&key);
                }
                (job, state.busy_until.get(&key).cloned())
            };

            if let Some(done) = done {
                if !done.is_set() {
                    done.wait().await;
                }
            }

            self.run_job.run(job).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct RecordingRunner {
        seen: Arc<Mutex<Vec<String>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobRunner for RecordingRunner {
        async fn run(&self, job: ThreadJob) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.seen.lock().await.push(job.text);
        }
    }

    #[tokio::test]
    async fn jobs_on_same_session_run_in_fifo_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let runner = Arc::new(RecordingRunner {
            seen: seen.clone(),
            calls: AtomicUsize::new(0),
        });
        let scheduler = ThreadScheduler::new(runner);
        let token = ResumeToken::new("codex", "abc");

        for text in ["a", "b", "c"] {
            scheduler
                .enqueue_resume(1, 1, text.to_string(), token.clone(), None)
                .await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*seen.lock().await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn waits_for_busy_run_before_starting() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let runner = Arc::new(RecordingRunner {
            seen: seen.clone(),
            calls: AtomicUsize::new(0),
        });
        let scheduler = ThreadScheduler::new(runner);
        let token = ResumeToken::new("codex", "abc");

        let done = Arc::new(DoneEvent::new());
        scheduler.note_thread_known(&token, done.clone()).await;

        scheduler
            .enqueue_resume(1, 1, "queued".to_string(), token.clone(), None)
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(seen.lock().await.is_empty(), "must wait for busy_until");

        done.set();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().await, vec!["queued"]);
    }
}
