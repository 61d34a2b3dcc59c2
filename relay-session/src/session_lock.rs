//! Per-session mutual exclusion with weak lifetime (spec.md §4.4), grounded
//! on `runner.py`'s `SessionLockMixin` (a `WeakValueDictionary` of
//! `anyio.Lock`s). Rust has real weak references, so the registry is a
//! `HashMap<String, Weak<Mutex<()>>>` pruned on each lookup rather than the
//! refcounting workaround `spec.md` §9 suggests for languages without them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use relay_core::ResumeToken;

fn key(token: &ResumeToken) -> String {
    format!("{}:{}", token.engine, token.value)
}

/// Keyed mutual-exclusion table. Two concurrent resumes to the same session
/// serialize; concurrent runs against distinct sessions never block each
/// other (spec.md §4.4, tested by §8 scenario 6).
#[derive(Default)]
pub struct SessionLockRegistry {
    locks: StdMutex<HashMap<String, std::sync::Weak<AsyncMutex<()>>>>,
}

impl SessionLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, token: &ResumeToken) -> Arc<AsyncMutex<()>> {
        let key = key(token);
        let mut locks = self.locks.lock().expect("session lock registry poisoned");
        if let Some(existing) = locks.get(&key).and_then(std::sync::Weak::upgrade) {
            return existing;
        }
        let fresh = Arc::new(AsyncMutex::new(()));
        locks.insert(key, Arc::downgrade(&fresh));
        fresh
    }

    /// Acquires the lock for `token`, awaiting it if another run already
    /// holds it. The returned guard releases the lock (and, once every
    /// other holder has also dropped its guard, the registry entry itself)
    /// on drop.
    pub async fn acquire(&self, token: &ResumeToken) -> OwnedMutexGuard<()> {
        let arc = self.lock_for(token);
        arc.lock_owned().await
    }

    /// Number of live entries, for tests and diagnostics — entries whose
    /// last `Arc` has been dropped aren't counted even if the `HashMap`
    /// slot hasn't been swept yet.
    #[cfg(test)]
    fn live_count(&self) -> usize {
        let locks = self.locks.lock().unwrap();
        locks.values().filter(|w| w.strong_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_session_serializes() {
        let registry = Arc::new(SessionLockRegistry::new());
        let token = ResumeToken::new("codex", "abc");

        let order = Arc::new(StdMutex::new(Vec::new()));

        let r1 = registry.clone();
        let t1 = token.clone();
        let o1 = order.clone();
        let h1 = tokio::spawn(async move {
            let _guard = r1.acquire(&t1).await;
            o1.lock().unwrap().push("start1");
            tokio::time::sleep(Duration::from_millis(30)).await;
            o1.lock().unwrap().push("end1");
        });

        tokio::time::sleep(Duration::from_millis(5)).await;

        let r2 = registry.clone();
        let t2 = token.clone();
        let o2 = order.clone();
        let h2 = tokio::spawn(async move {
            let _guard = r2.acquire(&t2).await;
            o2.lock().unwrap().push("start2");
        });

        h1.await.unwrap();
        h2.await.unwrap();

        let order = order.lock().unwrap();
        assert_eq!(order.as_slice(), ["start1", "end1", "start2"]);
    }

    #[tokio::test]
    async fn distinct_sessions_do_not_block() {
        let registry = Arc::new(SessionLockRegistry::new());
        let a = ResumeToken::new("codex", "a");
        let b = ResumeToken::new("codex", "b");

        let guard_a = registry.acquire(&a).await;
        // Must not deadlock: a distinct session's lock is independent.
        let _guard_b = registry.acquire(&b).await;
        drop(guard_a);
    }

    #[tokio::test]
    async fn entry_is_evicted_once_unreferenced() {
        let registry = SessionLockRegistry::new();
        let token = ResumeToken::new("codex", "abc");
        {
            let _guard = registry.acquire(&token).await;
            assert_eq!(registry.live_count(), 1);
        }
        assert_eq!(registry.live_count(), 0);
    }
}
