//! The live handle for one in-flight run and the registry `/cancel` looks
//! it up through (spec.md §3, §5's cancellation model), grounded on
//! `original_source/src/takopi/runner_bridge.py`'s `RunningTask`/
//! `RunningTasks`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio_util::sync::CancellationToken;

use relay_core::{MessageRef, ResumeToken, RunContext};
use relay_session::DoneEvent;

/// One in-flight run, registered under its progress message's ref so a
/// `/cancel` reply (or the `takopi:cancel` callback button) can find it.
pub struct RunningTask {
    pub cancel: CancellationToken,
    pub resume_ready: Arc<DoneEvent>,
    pub done: Arc<DoneEvent>,
    pub context: Option<RunContext>,
    resume: StdMutex<Option<ResumeToken>>,
}

impl RunningTask {
    pub fn new(context: Option<RunContext>) -> Arc<Self> {
        Arc::new(Self {
            cancel: CancellationToken::new(),
            resume_ready: Arc::new(DoneEvent::new()),
            done: Arc::new(DoneEvent::new()),
            context,
            resume: StdMutex::new(None),
        })
    }

    pub fn resume(&self) -> Option<ResumeToken> {
        self.resume.lock().expect("running task resume lock poisoned").clone()
    }

    /// Publishes the session id discovered on the first `Started` event
    /// (spec.md §4.8 step 4) and fires `resume_ready` so queued follow-ups
    /// can dispatch.
    pub fn publish_resume(&self, token: ResumeToken) {
        *self.resume.lock().expect("running task resume lock poisoned") = Some(token);
        self.resume_ready.set();
    }

    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }
}

/// `progress_ref -> RunningTask` map. Conceptually single-writer: the
/// orchestrator task owning an entry is the only one that mutates it;
/// other tasks only read or request cancellation (spec.md §5).
pub struct RunningTasks {
    tasks: tokio::sync::Mutex<HashMap<MessageRef, Arc<RunningTask>>>,
}

impl RunningTasks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { tasks: tokio::sync::Mutex::new(HashMap::new()) })
    }

    pub async fn register(&self, progress_ref: MessageRef, task: Arc<RunningTask>) {
        self.tasks.lock().await.insert(progress_ref, task);
    }

    pub async fn unregister(&self, progress_ref: &MessageRef) {
        self.tasks.lock().await.remove(progress_ref);
    }

    pub async fn get(&self, progress_ref: &MessageRef) -> Option<Arc<RunningTask>> {
        self.tasks.lock().await.get(progress_ref).cloned()
    }

    /// Looks up the task under `progress_ref` and requests cancellation.
    /// Returns `false` if no task is registered there (already finished,
    /// or the reply target wasn't a progress message).
    pub async fn request_cancel(&self, progress_ref: &MessageRef) -> bool {
        match self.tasks.lock().await.get(progress_ref) {
            Some(task) => {
                task.request_cancel();
                true
            }
            None => false,
        }
    }
}
