//! Priority-coalescing, rate-limited outbound Telegram dispatch (spec.md
//! §4.7).

pub mod op;
pub mod outbox;
pub mod rate_limit;

pub use op::{BoxFuture, ExecError, Execute, OutboxKey, OutboxOp, Priority, UniqueKeys};
pub use outbox::Outbox;
pub use rate_limit::ChatRateLimiter;
