use std::time::Duration;
use time::OffsetDateTime;

/// Wait before re-attempt `n` (1-based) is `BACKOFF_SCHEDULE_SECS[n - 1]`.
pub const BACKOFF_SCHEDULE_SECS: [u64; 5] = [60, 300, 900, 1800, 3600];

pub const DEFAULT_MAX_TRIES: u32 = 5;

/// Retry strategy for webhook delivery
///
/// Failed deliveries are retried on a fixed backoff table until the attempt
/// budget is spent.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    max_tries: u32,

    schedule: Vec<Duration>,
}

impl RetryStrategy {
    /// Create a retry strategy with the standard backoff table
    pub fn new(max_tries: u32) -> Self {
        Self {
            max_tries,
            schedule: BACKOFF_SCHEDULE_SECS
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        }
    }

    /// Replace the backoff table. An empty table means immediate retries.
    pub fn with_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.schedule = schedule;
        self
    }

    /// Get maximum number of attempts
    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Check if another attempt is allowed after `attempt_count` attempts
    pub fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_tries
    }

    /// Delay after the given attempt, clamped to the last table entry.
    pub fn delay_after(&self, attempt_count: u32) -> Duration {
        let index = attempt_count.saturating_sub(1) as usize;
        self.schedule
            .get(index)
            .or_else(|| self.schedule.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// When the next attempt is due, or `None` if the budget is exhausted.
    pub fn next_retry_at(&self, attempt_count: u32, now: OffsetDateTime) -> Option<OffsetDateTime> {
        if !self.should_retry(attempt_count) {
            return None;
        }
        Some(now + self.delay_after(attempt_count))
    }

    /// Check if an HTTP status code counts as delivered
    pub fn is_success_status(status_code: u16) -> bool {
        (200..=299).contains(&status_code)
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRIES)
    }
}
