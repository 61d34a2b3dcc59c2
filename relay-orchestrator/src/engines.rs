//! Erases `SubprocessRunner<T>`'s translator type parameter behind a
//! trait object so the orchestrator can hold one engine per configured CLI
//! in a single map, and picks which engine answers one prompt (spec.md
//! §6's `/<engine>` override). Grounded on
//! `original_source/src/takopi/runner_bridge.py`'s `runners: dict[str,
//! BaseRunner]` lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use relay_core::{EngineId, Event, ResumeToken, Result};
use relay_runner::{SubprocessRunner, Translator};
use relay_session::SessionLockRegistry;

/// Object-safe façade over `SubprocessRunner<T>::run_locked`, so the
/// orchestrator can hold engines of different translator types in one map.
#[async_trait]
pub trait EngineRunner: Send + Sync {
    fn engine(&self) -> &EngineId;

    async fn run_locked(
        self: Arc<Self>,
        locks: Arc<SessionLockRegistry>,
        prompt: String,
        resume: Option<ResumeToken>,
        tx: UnboundedSender<Event>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

#[async_trait]
impl<T: Translator + 'static> EngineRunner for SubprocessRunner<T> {
    fn engine(&self) -> &EngineId {
        SubprocessRunner::engine(self)
    }

    async fn run_locked(
        self: Arc<Self>,
        locks: Arc<SessionLockRegistry>,
        prompt: String,
        resume: Option<ResumeToken>,
        tx: UnboundedSender<Event>,
        cancel: CancellationToken,
    ) -> Result<()> {
        SubprocessRunner::run_locked(self, locks, prompt, resume, tx, cancel).await
    }
}

/// Picks which engine handles a prompt: an explicit `/<engine>` override
/// wins, then the thread's remembered default, then the configured
/// fallback.
pub struct EngineRegistry {
    engines: HashMap<EngineId, Arc<dyn EngineRunner>>,
    fallback: EngineId,
}

impl EngineRegistry {
    pub fn new(fallback: impl Into<EngineId>) -> Self {
        Self {
            engines: HashMap::new(),
            fallback: fallback.into(),
        }
    }

    pub fn register(&mut self, runner: Arc<dyn EngineRunner>) {
        self.engines.insert(runner.engine().clone(), runner);
    }

    pub fn get(&self, engine: &EngineId) -> Option<Arc<dyn EngineRunner>> {
        self.engines.get(engine).cloned()
    }

    pub fn fallback(&self) -> &EngineId {
        &self.fallback
    }

    pub fn resolve(&self, override_engine: Option<&EngineId>, thread_default: Option<&EngineId>) -> EngineId {
        override_engine
            .or(thread_default)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}
