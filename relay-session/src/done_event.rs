use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A one-shot event that any number of tasks can wait on, and that stays
/// "set" forever once fired. Mirrors `anyio.Event`, used by
/// `original_source/src/takopi/scheduler.py` to let queued follow-ups know
/// when the current run on a session has finished.
#[derive(Default)]
pub struct DoneEvent {
    fired: AtomicBool,
    notify: Notify,
}

impl DoneEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.fired.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn wait_returns_immediately_once_set() {
        let event = DoneEvent::new();
        event.set();
        event.wait().await;
    }

    #[tokio::test]
    async fn wait_unblocks_on_set() {
        let event = Arc::new(DoneEvent::new());
        let waiter = {
            let event = event.clone();
            tokio::spawn(async move {
                event.wait().await;
            })
        };
        tokio::task::yield_now().await;
        event.set();
        waiter.await.unwrap();
    }
}
