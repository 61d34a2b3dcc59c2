//! Single-writer-per-chat dispatcher (spec.md §4.7): one background task per
//! chat id drains that chat's queue in priority/FIFO order, rate-limited and
//! retried independently of every other chat's task. Grounded on the
//! debounce-loop shape of `relay_progress::coalescer::ProgressCoalescer`
//! (itself grounded on the run lifecycle in `original_source/runner.py`) —
//! here the wakeup drains a priority queue instead of re-rendering a frame.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::op::{ExecError, OutboxKey, OutboxOp, Priority, UniqueKeys};
use crate::rate_limit::ChatRateLimiter;

/// How many times a single op retries a `RetryAfter` before giving up and
/// surfacing the error (spec.md §4.7 allows implementations to cap this).
const MAX_RETRY_AFTER_ATTEMPTS: u32 = 5;

struct PendingOp {
    op: OutboxOp,
    done: Option<oneshot::Sender<Result<(), ExecError>>>,
}

struct ChatQueue {
    pending: Mutex<Vec<PendingOp>>,
    notify: Notify,
}

impl ChatQueue {
    fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }
}

/// Picks the next op to run: lowest `Priority`, then oldest `queued_at`.
fn pop_best(pending: &mut Vec<PendingOp>) -> Option<PendingOp> {
    let mut best_idx = None;
    for (idx, candidate) in pending.iter().enumerate() {
        let better = match best_idx {
            None => true,
            Some(current) => {
                let current: &PendingOp = &pending[current];
                (candidate.op.priority, candidate.op.queued_at)
                    < (current.op.priority, current.op.queued_at)
            }
        };
        if better {
            best_idx = Some(idx);
        }
    }
    best_idx.map(|idx| pending.remove(idx))
}

/// Drops any queued (not-yet-started) edit for `(chat_id, message_id)`.
fn drop_pending_edits_locked(pending: &mut Vec<PendingOp>, chat_id: i64, message_id: i64) {
    pending.retain(|p| p.op.key != OutboxKey::Edit { chat_id, message_id });
}

/// Per-chat, priority-ordered, rate-limited delivery of Telegram API calls
/// (spec.md §4.7). Cheap to clone; every clone shares the same chat
/// registry and worker tasks.
#[derive(Clone)]
pub struct Outbox {
    chats: Arc<DashMap<i64, Arc<ChatQueue>>>,
    global: Arc<ChatQueue>,
    workers: Arc<Mutex<HashMap<i64, JoinHandle<()>>>>,
    global_worker: Arc<Mutex<Option<JoinHandle<()>>>>,
    rate_limiter: Arc<ChatRateLimiter>,
    unique_keys: Arc<UniqueKeys>,
    cancel: CancellationToken,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            chats: Arc::new(DashMap::new()),
            global: Arc::new(ChatQueue::new()),
            workers: Arc::new(Mutex::new(HashMap::new())),
            global_worker: Arc::new(Mutex::new(None)),
            rate_limiter: Arc::new(ChatRateLimiter::new()),
            unique_keys: Arc::new(UniqueKeys::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// A key guaranteed not to collide with any coalescing key, for ops
    /// that should never merge (spec.md §4.7's "other ops are uniquely
    /// keyed"), mirroring `client.py`'s `unique_key(prefix)`.
    pub fn unique_key(&self) -> OutboxKey {
        self.unique_keys.next()
    }

    /// Enqueues `op`, applying the coalescing rules for its key, and
    /// returns a receiver the caller may await for the result — or drop,
    /// for fire-and-forget dispatch (`wait=false` in the original).
    pub async fn enqueue(&self, op: OutboxOp) -> oneshot::Receiver<Result<(), ExecError>> {
        let (tx, rx) = oneshot::channel();
        let chat_id = op.chat_id;
        let queue = match chat_id {
            Some(id) => self.queue_for(id),
            None => self.global.clone(),
        };

        {
            let mut pending = queue.pending.lock().await;
            match op.key {
                OutboxKey::Edit { chat_id, message_id } => {
                    if let Some(slot) = pending
                        .iter_mut()
                        .find(|p| p.op.key == OutboxKey::Edit { chat_id, message_id })
                    {
                        debug!(chat_id, message_id, "outbox.coalesce.edit");
                        slot.op = op;
                        slot.done = Some(tx);
                        queue.notify.notify_one();
                        return rx;
                    }
                }
                OutboxKey::Delete { chat_id, message_id } => {
                    drop_pending_edits_locked(&mut pending, chat_id, message_id);
                }
                OutboxKey::Send { chat_id, replace_message_id } => {
                    drop_pending_edits_locked(&mut pending, chat_id, replace_message_id);
                }
                OutboxKey::Unique(_) => {}
            }
            pending.push(PendingOp { op, done: Some(tx) });
        }
        queue.notify.notify_one();

        if let Some(id) = chat_id {
            self.ensure_worker(id, queue).await;
        } else {
            self.ensure_global_worker().await;
        }

        rx
    }

    /// Drops any queued edit for `(chat_id, message_id)` without enqueuing
    /// anything new (spec.md §4.7's explicit `drop_pending_edits`).
    pub async fn drop_pending_edits(&self, chat_id: i64, message_id: i64) {
        if let Some(queue) = self.chats.get(&chat_id) {
            let mut pending = queue.pending.lock().await;
            drop_pending_edits_locked(&mut pending, chat_id, message_id);
        }
    }

    fn queue_for(&self, chat_id: i64) -> Arc<ChatQueue> {
        self.chats
            .entry(chat_id)
            .or_insert_with(|| Arc::new(ChatQueue::new()))
            .clone()
    }

    async fn ensure_worker(&self, chat_id: i64, queue: Arc<ChatQueue>) {
        let mut workers = self.workers.lock().await;
        if workers.get(&chat_id).is_some_and(|h| !h.is_finished()) {
            return;
        }
        let rate_limiter = self.rate_limiter.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            run_chat_worker(Some(chat_id), queue, rate_limiter, cancel).await;
        });
        workers.insert(chat_id, handle);
    }

    async fn ensure_global_worker(&self) {
        let mut slot = self.global_worker.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let queue = self.global.clone();
        let rate_limiter = self.rate_limiter.clone();
        let cancel = self.cancel.clone();
        *slot = Some(tokio::spawn(async move {
            run_chat_worker(None, queue, rate_limiter, cancel).await;
        }));
    }

    /// Drains every chat's queue and stops all workers. Idempotent — a
    /// second call just awaits the already-cancelled workers again
    /// (spec.md §4.7: "Close: drains with cancellation ... idempotent").
    pub async fn close(&self) {
        self.cancel.cancel();
        for queue in self.chats.iter() {
            queue.notify.notify_waiters();
        }
        self.global.notify.notify_waiters();

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().await;
            workers.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        if let Some(handle) = self.global_worker.lock().await.take() {
            let _ = handle.await;
        }
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_chat_worker(
    chat_id: Option<i64>,
    queue: Arc<ChatQueue>,
    rate_limiter: Arc<ChatRateLimiter>,
    cancel: CancellationToken,
) {
    loop {
        let next = {
            let mut pending = queue.pending.lock().await;
            pop_best(&mut pending)
        };

        let Some(PendingOp { op, done }) = next else {
            if cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = queue.notify.notified() => continue,
                _ = cancel.cancelled() => {
                    // Fall through once more to drain anything left queued.
                    let mut pending = queue.pending.lock().await;
                    if pop_best(&mut pending).is_none() {
                        return;
                    }
                    continue;
                }
            }
        };

        if let Some(id) = chat_id {
            rate_limiter.until_ready(id).await;
        }

        let result = dispatch_with_retry(&op).await;
        if let Err(err) = &result {
            warn!(label = %op.label, error = %err, "outbox.op.failed");
        }
        if let Some(done) = done {
            let _ = done.send(result);
        }
    }
}

async fn dispatch_with_retry(op: &OutboxOp) -> Result<(), ExecError> {
    let mut attempts = 0;
    loop {
        match (op.execute)().await {
            Ok(()) => return Ok(()),
            Err(ExecError::RetryAfter(seconds)) => {
                attempts += 1;
                if attempts > MAX_RETRY_AFTER_ATTEMPTS {
                    return Err(ExecError::Failed(format!(
                        "{}: exceeded retry-after attempts",
                        op.label
                    )));
                }
                debug!(label = %op.label, seconds, attempts, "outbox.retry_after");
                tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
            }
            Err(err @ ExecError::Failed(_)) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn exec_ok(calls: Arc<AtomicUsize>) -> crate::op::Execute {
        Arc::new(move || {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn edits_with_same_key_coalesce_to_the_latest() {
        let outbox = Outbox::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = OutboxOp::new(
            "edit-1",
            Priority::Edit,
            Some(1),
            OutboxKey::Edit { chat_id: 1, message_id: 10 },
            exec_ok(calls.clone()),
        );
        let second = OutboxOp::new(
            "edit-2",
            Priority::Edit,
            Some(1),
            OutboxKey::Edit { chat_id: 1, message_id: 10 },
            exec_ok(calls.clone()),
        );

        // Hold the chat queue's lock window open long enough that both
        // enqueues land before the worker can drain the first.
        let _rx1 = outbox.enqueue(first).await;
        let rx2 = outbox.enqueue(second).await;

        let _ = rx2.await;
        outbox.close().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delete_drops_pending_edit_for_same_message() {
        let outbox = Outbox::new();
        let edit_calls = Arc::new(AtomicUsize::new(0));
        let delete_calls = Arc::new(AtomicUsize::new(0));

        outbox
            .drop_pending_edits(1, 10)
            .await;

        let edit = OutboxOp::new(
            "edit",
            Priority::Edit,
            Some(1),
            OutboxKey::Edit { chat_id: 1, message_id: 10 },
            exec_ok(edit_calls.clone()),
        );
        let _rx_edit = outbox.enqueue(edit).await;

        let delete = OutboxOp::new(
            "delete",
            Priority::Delete,
            Some(1),
            OutboxKey::Delete { chat_id: 1, message_id: 10 },
            exec_ok(delete_calls.clone()),
        );
        let rx_delete = outbox.enqueue(delete).await;
        let _ = rx_delete.await;
        outbox.close().await;

        assert_eq!(edit_calls.load(Ordering::SeqCst), 0);
        assert_eq!(delete_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_runs_before_edit_regardless_of_order_queued() {
        let outbox = Outbox::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        let edit = OutboxOp::new(
            "edit",
            Priority::Edit,
            Some(1),
            OutboxKey::Edit { chat_id: 1, message_id: 1 },
            Arc::new(move || {
                let o1 = o1.clone();
                Box::pin(async move {
                    o1.lock().await.push("edit");
                    Ok(())
                })
            }),
        );

        // Block the chat's worker before it can run either op by enqueuing
        // both under the queue lock's release window: enqueue edit first,
        // then send, and assert send still wins on priority.
        let _rx_edit = outbox.enqueue(edit).await;

        let o2 = order.clone();
        let send = OutboxOp::new(
            "send",
            Priority::Send,
            Some(1),
            OutboxKey::Unique(999),
            Arc::new(move || {
                let o2 = o2.clone();
                Box::pin(async move {
                    o2.lock().await.push("send");
                    Ok(())
                })
            }),
        );
        let rx_send = outbox.enqueue(send).await;
        let _ = rx_send.await;
        outbox.close().await;

        let order = order.lock().await;
        assert_eq!(order.first().map(String::as_str), Some("send"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_sleeps_then_succeeds() {
        let outbox = Outbox::new();
        let attempt = Arc::new(AtomicUsize::new(0));
        let a = attempt.clone();
        let op = OutboxOp::new(
            "flaky",
            Priority::Send,
            Some(1),
            OutboxKey::Unique(1),
            Arc::new(move || {
                let a = a.clone();
                Box::pin(async move {
                    if a.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ExecError::RetryAfter(1))
                    } else {
                        Ok(())
                    }
                })
            }),
        );
        let rx = outbox.enqueue(op).await;
        let result = rx.await.unwrap();
        assert!(result.is_ok());
        outbox.close().await;
        assert_eq!(attempt.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let outbox = Outbox::new();
        outbox.close().await;
        outbox.close().await;
    }
}
