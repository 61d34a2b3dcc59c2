use serde::{Deserialize, Serialize};

/// Identifies a Telegram message for edit/delete/reply (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
    pub thread_id: Option<i32>,
}

impl MessageRef {
    pub fn new(chat_id: i64, message_id: i32, thread_id: Option<i32>) -> Self {
        Self {
            chat_id,
            message_id,
            thread_id,
        }
    }

    /// A chat is a "group" (for rate-limiting purposes, spec.md §4.7) iff
    /// its id is negative — Telegram's convention for groups/supergroups/
    /// channels.
    pub fn is_group_chat(&self) -> bool {
        self.chat_id < 0
    }
}
