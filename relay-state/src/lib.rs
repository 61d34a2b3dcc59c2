//! Persistent, versioned JSON state stores (spec.md §4.10).

pub mod chat_session;
pub mod store;
pub mod topic;

pub use chat_session::ChatSessionStore;
pub use store::{JsonStateStore, VersionedState};
pub use topic::{TopicStateStore, TopicThreadSnapshot};
