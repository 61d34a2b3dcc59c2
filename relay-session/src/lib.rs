//! Session-level concurrency primitives: resume-line parsing, the per-session
//! mutual-exclusion lock, the one-shot `DoneEvent`, and the thread scheduler
//! that serializes follow-ups against an already-running session
//! (spec.md §4.3, §4.4, §4.9).

pub mod done_event;
pub mod resume_line;
pub mod scheduler;
pub mod session_lock;

pub use done_event::DoneEvent;
pub use resume_line::{AliasResumeSyntax, RegexResumeSyntax, ResumeSyntax, is_any_resume_line, strip_resume_lines};
pub use scheduler::{JobRunner, ThreadJob, ThreadScheduler};
pub use session_lock::SessionLockRegistry;
