//! Per-chat broadcast cooldown
//!
//! Remembers when each chat last broadcast and decides whether a new
//! broadcast may start. State lives only for the lifetime of the process.

use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Extra lifetime given to table entries past the cooldown.
const ENTRY_GRACE: Duration = Duration::from_secs(60);

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The broadcast may proceed; its use has been recorded.
    Admitted,
    /// The chat is still cooling down.
    Denied {
        /// Whole seconds left, rounded up, never below 1.
        remaining_secs: u64,
    },
}

/// Tracks the last broadcast time of every chat.
///
/// Entries are kept in a [`moka`] cache whose time-to-live outlasts the
/// cooldown, so chats that went quiet are dropped automatically. The cache has
/// no capacity bound: an entry still inside its cooldown is never evicted.
#[derive(Clone)]
pub struct RateLimiter {
    /// chat_id -> time of the last admitted broadcast
    last_use: Cache<i64, Instant>,
    cooldown: Duration,
    /// Counter for denied requests (for logging throttling)
    denied_count: Arc<AtomicU64>,
}

impl RateLimiter {
    /// Creates a limiter with the given cooldown.
    ///
    /// # Examples
    ///
    /// ```
    /// use rollcall_core::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(Duration::from_secs(30));
    /// assert_eq!(limiter.cooldown(), Duration::from_secs(30));
    /// ```
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        let last_use = Cache::builder()
            .time_to_live(cooldown + ENTRY_GRACE)
            .build();

        Self {
            last_use,
            cooldown,
            denied_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns true if the chat has never broadcast or its cooldown has passed.
    pub async fn is_allowed(&self, chat_id: i64, now: Instant) -> bool {
        self.remaining(chat_id, now).await.is_none()
    }

    /// Time left before the chat may broadcast again, if any.
    pub async fn remaining(&self, chat_id: i64, now: Instant) -> Option<Duration> {
        let last = self.last_use.get(&chat_id).await?;
        remaining_after(last, now, self.cooldown)
    }

    /// Records a broadcast. Timestamps never move backwards.
    pub async fn record_use(&self, chat_id: i64, now: Instant) {
        self.last_use
            .entry(chat_id)
            .and_compute_with(|entry| {
                let op = match entry {
                    Some(entry) if *entry.value() >= now => Op::Nop,
                    _ => Op::Put(now),
                };
                std::future::ready(op)
            })
            .await;
    }

    /// Checks admission and records the use in one step.
    ///
    /// The check and the write run under the cache's per-key lock, so two
    /// concurrent requests for the same chat cannot both be admitted.
    pub async fn try_admit(&self, chat_id: i64, now: Instant) -> Admission {
        let cooldown = self.cooldown;
        let result = self
            .last_use
            .entry(chat_id)
            .and_compute_with(|entry| {
                let op = match entry {
                    Some(entry) if remaining_after(*entry.value(), now, cooldown).is_some() => {
                        Op::Nop
                    }
                    _ => Op::Put(now),
                };
                std::future::ready(op)
            })
            .await;

        match result {
            CompResult::Inserted(_) | CompResult::ReplacedWith(_) => Admission::Admitted,
            CompResult::Unchanged(entry) => {
                let remaining =
                    remaining_after(*entry.value(), now, cooldown).unwrap_or(Duration::ZERO);
                self.note_denied(chat_id);
                Admission::Denied {
                    remaining_secs: whole_secs_ceil(remaining),
                }
            }
            // The closure never removes and always writes on a vacant key.
            CompResult::Removed(_) | CompResult::StillNone(_) => {
                self.record_use(chat_id, now).await;
                Admission::Admitted
            }
        }
    }

    fn note_denied(&self, chat_id: i64) {
        let count = self.denied_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(chat_id, denied_total = count, "Broadcast denied by cooldown");
    }

    /// Returns the configured cooldown.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Total number of denied admissions since start.
    #[must_use]
    pub fn denied_count(&self) -> u64 {
        self.denied_count.load(Ordering::Relaxed)
    }
}

/// `None` once strictly more than `cooldown` has passed since `last`.
fn remaining_after(last: Instant, now: Instant, cooldown: Duration) -> Option<Duration> {
    let elapsed = now.saturating_duration_since(last);
    if elapsed > cooldown {
        None
    } else {
        Some(cooldown - elapsed)
    }
}

fn whole_secs_ceil(remaining: Duration) -> u64 {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}
