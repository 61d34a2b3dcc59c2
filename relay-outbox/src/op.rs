//! Op shapes for the per-chat outbox (spec.md §4.7), grounded on the
//! `enqueue_op` call sites in `original_source/src/takopi/telegram/client.py`
//! (the outbox implementation itself was filtered out of the retrieval pack;
//! only its consumer survives, so the op shape here is reconstructed from
//! that call-site contract plus the prose in spec.md §4.7).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// What went wrong dispatching one op. `RetryAfter` is Telegram's 429;
/// the worker sleeps and retries the same op (spec.md §4.7).
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    #[error("rate limited, retry after {0}s")]
    RetryAfter(u64),
    #[error("{0}")]
    Failed(String),
}

/// Lower runs first: final answers beat in-flight progress edits beat
/// cleanup deletes (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Send,
    Edit,
    Delete,
}

/// Determines which pending ops coalesce (spec.md §4.7). Two ops with equal
/// keys other than `Unique` are candidates for replacement/dropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboxKey {
    Edit { chat_id: i64, message_id: i64 },
    Delete { chat_id: i64, message_id: i64 },
    Send { chat_id: i64, replace_message_id: i64 },
    Unique(u64),
}

/// Monotonic source for `OutboxKey::Unique`, mirroring `client.py`'s
/// `unique_key(prefix)` counter (the prefix itself is carried in `label`
/// here since `OutboxKey` doesn't need it for equality).
#[derive(Default)]
pub struct UniqueKeys {
    next: AtomicU64,
}

impl UniqueKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> OutboxKey {
        OutboxKey::Unique(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

pub type Execute = Arc<dyn Fn() -> BoxFuture<Result<(), ExecError>> + Send + Sync>;

/// One unit of outbound Telegram work. `execute` is re-invocable so the
/// worker can retry it after a `RetryAfter` without the caller's knowledge.
pub struct OutboxOp {
    pub label: String,
    pub priority: Priority,
    pub chat_id: Option<i64>,
    pub key: OutboxKey,
    pub queued_at: Instant,
    pub execute: Execute,
}

impl OutboxOp {
    pub fn new(
        label: impl Into<String>,
        priority: Priority,
        chat_id: Option<i64>,
        key: OutboxKey,
        execute: Execute,
    ) -> Self {
        Self {
            label: label.into(),
            priority,
            chat_id,
            key,
            queued_at: Instant::now(),
            execute,
        }
    }
}

impl std::fmt::Debug for OutboxOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxOp")
            .field("label", &self.label)
            .field("priority", &self.priority)
            .field("chat_id", &self.chat_id)
            .field("key", &self.key)
            .finish()
    }
}
