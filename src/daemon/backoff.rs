//! Per-message retry schedule for failed aggregations.
//!
//! Each failure doubles the wait before the next attempt, starting from the
//! poll interval and capped at [`MAX_RETRY_DELAY`].

use crate::ledger::MessageId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryState {
    failures: u32,
    next_attempt: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AggregationBackoff {
    base: Duration,
    retries: HashMap<MessageId, RetryState>,
}

impl AggregationBackoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            retries: HashMap::new(),
        }
    }

    /// Whether message `id` may be attempted at `now`.
    pub fn ready(&self, id: MessageId, now: DateTime<Utc>) -> bool {
        self.retries
            .get(&id)
            .map_or(true, |state| now >= state.next_attempt)
    }

    /// Record a failed attempt and return when the next one is due.
    pub fn record_failure(&mut self, id: MessageId, now: DateTime<Utc>) -> DateTime<Utc> {
        let failures = self.retries.get(&id).map_or(0, |s| s.failures) + 1;
        let next_attempt = now + self.delay(failures);
        self.retries.insert(
            id,
            RetryState {
                failures,
                next_attempt,
            },
        );
        next_attempt
    }

    pub fn clear(&mut self, id: MessageId) {
        self.retries.remove(&id);
    }

    /// Forget messages that are no longer awaiting aggregation.
    pub fn retain(&mut self, mut awaiting: impl FnMut(MessageId) -> bool) {
        self.retries.retain(|id, _| awaiting(*id));
    }

    pub fn failures(&self, id: MessageId) -> u32 {
        self.retries.get(&id).map_or(0, |s| s.failures)
    }

    fn delay(&self, failures: u32) -> chrono::Duration {
        let factor = 1u32.checked_shl(failures.saturating_sub(1)).unwrap_or(u32::MAX);
        let delay = self
            .base
            .checked_mul(factor)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY);
        chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::hours(1))
    }
}
