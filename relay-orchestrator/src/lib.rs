//! Wires the runner, progress, outbox, session, and state crates into the
//! handle-message loop and the thread-scheduler bridge (spec.md §4.8,
//! §4.9). Grounded on `original_source/src/takopi/runner_bridge.py`.

pub mod cancel;
pub mod engines;
pub mod handle_message;
pub mod resume;
pub mod running;
pub mod scheduler_bridge;

pub use cancel::{handle_callback_cancel, handle_reply_cancel};
pub use engines::{EngineRegistry, EngineRunner};
pub use handle_message::{HandleMessageOutcome, IncomingPrompt, Orchestrator, OrchestratorConfig, ResumeSink};
pub use running::{RunningTask, RunningTasks};
pub use scheduler_bridge::SchedulerBridge;
