//! Sliding-window submission rate limiter
//!
//! Each submitter identity keeps a bounded history of submission instants.
//! Entries older than the window are pruned lazily on every check; there is
//! no background sweeper. The history map sits behind one short-lived lock
//! so prune/check/append never interleave.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Configuration for submission rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum submissions per window.
    pub max_transactions: usize,
    /// Rolling window duration.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10,
            window: Duration::from_secs(10),
        }
    }
}

pub struct SubmissionRateLimiter {
    config: RateLimitConfig,
    history: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SubmissionRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    pub fn can_submit(&self, submitter: &str) -> bool {
        self.can_submit_at(submitter, Instant::now())
    }

    pub fn can_submit_at(&self, submitter: &str, now: Instant) -> bool {
        let mut history = self.history.lock();
        match history.get_mut(submitter) {
            Some(events) => {
                prune(events, now, self.config.window);
                events.len() < self.config.max_transactions
            }
            None => self.config.max_transactions > 0,
        }
    }

    pub fn record_submission(&self, submitter: &str) {
        self.record_submission_at(submitter, Instant::now());
    }

    pub fn record_submission_at(&self, submitter: &str, now: Instant) {
        let mut history = self.history.lock();
        let events = history.entry(submitter.to_string()).or_default();
        prune(events, now, self.config.window);
        events.push_back(now);
    }

    /// Check and record in one critical section. On denial returns how long
    /// until the oldest event leaves the window.
    pub fn try_acquire(&self, submitter: &str) -> Result<(), Duration> {
        self.try_acquire_at(submitter, Instant::now())
    }

    pub fn try_acquire_at(&self, submitter: &str, now: Instant) -> Result<(), Duration> {
        let mut history = self.history.lock();
        let events = history.entry(submitter.to_string()).or_default();
        prune(events, now, self.config.window);

        if events.len() < self.config.max_transactions {
            events.push_back(now);
            return Ok(());
        }

        let retry_after = events
            .front()
            .map(|oldest| self.config.window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(self.config.window);
        debug!(submitter, in_window = events.len(), ?retry_after, "submission rate limited");
        Err(retry_after)
    }

    /// Give back the most recent slot for a submission that never left
    /// the process.
    pub fn refund(&self, submitter: &str) {
        let mut history = self.history.lock();
        if let Some(events) = history.get_mut(submitter) {
            events.pop_back();
        }
    }
}

fn prune(events: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = events.front() {
        if now.saturating_duration_since(*oldest) >= window {
            events.pop_front();
        } else {
            break;
        }
    }
}
