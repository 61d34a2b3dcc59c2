//! `/cancel` and the `takopi:cancel` callback button (spec.md §5, §6),
//! grounded on `original_source/src/takopi/runner_bridge.py`'s
//! `_handle_cancel`.

use relay_core::MessageRef;
use relay_telegram::commands::{is_cancel_callback, is_cancel_command};

use crate::running::RunningTasks;

/// Handles a potential `/cancel` reply. `progress_ref` identifies the
/// message being replied to. Returns `true` iff a running task was found
/// there and cancellation was requested.
pub async fn handle_reply_cancel(running: &RunningTasks, text: &str, progress_ref: MessageRef) -> bool {
    if !is_cancel_command(text) {
        return false;
    }
    running.request_cancel(&progress_ref).await
}

/// Handles a potential `takopi:cancel` callback button press.
pub async fn handle_callback_cancel(running: &RunningTasks, data: &str, progress_ref: MessageRef) -> bool {
    if !is_cancel_callback(data) {
        return false;
    }
    running.request_cancel(&progress_ref).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::running::RunningTask;

    #[tokio::test]
    async fn reply_cancel_requests_cancellation_of_registered_task() {
        let running = RunningTasks::new();
        let progress_ref = MessageRef::new(1, 42, None);
        let task = RunningTask::new(None);
        running.register(progress_ref, task.clone()).await;

        assert!(handle_reply_cancel(&running, "/cancel", progress_ref).await);
        assert!(task.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn reply_cancel_ignores_unrelated_text() {
        let running = RunningTasks::new();
        let progress_ref = MessageRef::new(1, 42, None);
        let task = RunningTask::new(None);
        running.register(progress_ref, task.clone()).await;

        assert!(!handle_reply_cancel(&running, "keep going", progress_ref).await);
        assert!(!task.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn callback_cancel_requires_unregistered_task_to_report_false() {
        let running = RunningTasks::new();
        let progress_ref = MessageRef::new(1, 99, None);
        assert!(!handle_callback_cancel(&running, "takopi:cancel", progress_ref).await);
    }
}
