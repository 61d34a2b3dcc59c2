//! Per-chat token-bucket rate limiting (spec.md §4.7), grounded on the
//! `governor`-based per-IP limiter in
//! `swedishembedded-sven/crates/sven-gateway/src/http/auth.rs` — here keyed
//! by chat id instead of IP, with two quotas picked by sign.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};

type ChatLimiter = RateLimiter<i64, DashMapStateStore<i64>, DefaultClock>;

/// A chat is a "group" (looser quota, Telegram's convention) iff its id is
/// negative.
fn is_group(chat_id: i64) -> bool {
    chat_id < 0
}

/// Two independent token buckets: ~1 msg/sec for private chats, ~20/min for
/// groups and channels. The outbox sleeps until a chat's bucket has a token
/// before dispatching to it (spec.md §4.7).
pub struct ChatRateLimiter {
    private: Arc<ChatLimiter>,
    group: Arc<ChatLimiter>,
    clock: DefaultClock,
}

impl ChatRateLimiter {
    pub fn new() -> Self {
        let private_quota = Quota::per_second(NonZeroU32::new(1).expect("1 > 0"));
        let group_quota = Quota::per_minute(NonZeroU32::new(20).expect("20 > 0"));
        Self {
            private: Arc::new(RateLimiter::keyed(private_quota)),
            group: Arc::new(RateLimiter::keyed(group_quota)),
            clock: DefaultClock::default(),
        }
    }

    fn limiter_for(&self, chat_id: i64) -> &ChatLimiter {
        if is_group(chat_id) {
            &self.group
        } else {
            &self.private
        }
    }

    /// Blocks until `chat_id`'s bucket admits one more send.
    pub async fn until_ready(&self, chat_id: i64) {
        let limiter = self.limiter_for(chat_id);
        loop {
            match limiter.check_key(&chat_id) {
                Ok(()) => return,
                Err(not_until) => {
                    let wait = not_until.wait_time_from(self.clock.now());
                    if wait.is_zero() {
                        continue;
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

impl Default for ChatRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn private_chat_throttles_to_one_per_second() {
        let limiter = ChatRateLimiter::new();
        let start = tokio::time::Instant::now();
        limiter.until_ready(123).await;
        limiter.until_ready(123).await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn distinct_chats_do_not_share_a_bucket() {
        let limiter = ChatRateLimiter::new();
        limiter.until_ready(1).await;
        limiter.until_ready(2).await;
    }

    #[test]
    fn group_chat_ids_are_negative() {
        assert!(is_group(-1001234567890));
        assert!(!is_group(987654321));
    }
}
