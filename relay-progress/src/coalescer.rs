//! Debounces progress re-renders into at most one outbound edit per window
//! (spec.md §4.6). Grounded on the lifecycle described in
//! `original_source/src/takopi/runner.py`'s orchestration of a run (the
//! Python implementation inlines this loop; here it's pulled out into its
//! own background task so [`ProgressCoalescer`] can be unit-tested without
//! a real outbox).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

/// Where a coalesced edit actually gets dispatched. Implemented by
/// `relay-outbox`'s fire-and-forget edit op in the full stack; tests use a
/// recording stub.
#[async_trait::async_trait]
pub trait EditSink: Send + Sync {
    async fn edit(&self, text: String);
}

struct SharedState {
    event_seq: AtomicU64,
    rendered_seq: AtomicU64,
    last_sent: Mutex<Option<String>>,
    notify: Notify,
}

/// Drives one run's live progress message. Call [`Self::bump`] every time
/// the tracker reports a visible change; the background loop wakes,
/// re-renders, and — only if the text actually changed — dispatches an
/// edit through the sink. Debounced to at most one edit per `debounce`
/// (default 2s, spec.md §4.6).
pub struct ProgressCoalescer {
    shared: Arc<SharedState>,
    handle: JoinHandle<()>,
}

impl ProgressCoalescer {
    pub fn spawn<F>(sink: Arc<dyn EditSink>, debounce: Duration, mut render: F) -> Self
    where
        F: FnMut() -> String + Send + 'static,
    {
        let shared = Arc::new(SharedState {
            event_seq: AtomicU64::new(0),
            rendered_seq: AtomicU64::new(0),
            last_sent: Mutex::new(None),
            notify: Notify::new(),
        });

        let loop_shared = shared.clone();
        let handle = tokio::spawn(async move {
            loop {
                loop_shared.notify.notified().await;
                // Collapse any events that queued up during the debounce sleep.
                tokio::time::sleep(debounce).await;
                let event_seq = loop_shared.event_seq.load(Ordering::SeqCst);
                let rendered_seq = loop_shared.rendered_seq.load(Ordering::SeqCst);
                if event_seq <= rendered_seq {
                    continue;
                }
                loop_shared.rendered_seq.store(event_seq, Ordering::SeqCst);

                let text = render();
                let mut last_sent = loop_shared.last_sent.lock().await;
                if last_sent.as_deref() == Some(text.as_str()) {
                    continue;
                }
                sink.edit(text.clone()).await;
                *last_sent = Some(text);
            }
        });

        Self { shared, handle }
    }

    /// Records that the tracker accepted a new event. Wakes the
    /// background loop, which will re-render after the debounce window.
    pub fn bump(&self) {
        self.shared.event_seq.fetch_add(1, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }

    /// Cancels the background loop. Called when the run finishes (spec.md
    /// §4.6's lifecycle); in-flight edits are abandoned, never awaited.
    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Tracks wall-clock elapsed time for a run, used by the renderer's header.
pub struct RunClock {
    started_at: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self { started_at: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// A sink that never actually sends anything; the coalescer silently
/// no-ops when the progress message was never created (spec.md §4.6).
pub struct NullSink;

#[async_trait::async_trait]
impl EditSink for NullSink {
    async fn edit(&self, _text: String) {
        warn!("progress.coalescer.null_sink");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct RecordingSink {
        texts: Mutex<Vec<String>>,
        count: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EditSink for RecordingSink {
        async fn edit(&self, text: String) {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.texts.lock().await.push(text);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn collapses_bursts_into_one_edit() {
        let sink = Arc::new(RecordingSink { texts: Mutex::new(Vec::new()), count: AtomicUsize::new(0) });
        let sink_dyn: Arc<dyn EditSink> = sink.clone();
        let rendered = Arc::new(AtomicUsize::new(0));
        let rendered_for_closure = rendered.clone();
        let coalescer = ProgressCoalescer::spawn(sink_dyn, Duration::from_millis(50), move || {
            let n = rendered_for_closure.fetch_add(1, Ordering::SeqCst);
            format!("frame-{n}")
        });

        coalescer.bump();
        coalescer.bump();
        coalescer.bump();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
        coalescer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_resend_identical_render() {
        let sink = Arc::new(RecordingSink { texts: Mutex::new(Vec::new()), count: AtomicUsize::new(0) });
        let sink_dyn: Arc<dyn EditSink> = sink.clone();
        let coalescer = ProgressCoalescer::spawn(sink_dyn, Duration::from_millis(10), || "same".to_string());

        coalescer.bump();
        tokio::time::sleep(Duration::from_millis(50)).await;
        coalescer.bump();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
        coalescer.stop();
    }
}
