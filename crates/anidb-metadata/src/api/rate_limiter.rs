//! Rate limiter for AniDB requests.
//!
//! Enforces a minimum spacing between two consecutive requests and an average
//! spacing measured over a sliding window. The limiter is shared by every
//! concurrent lookup; waiters are released in the order they asked.

use crate::error::{AniDbError, Result};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Rate limiter with minimum, average and window constraints
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum time between two releases
    min_interval: Duration,
    /// Average time between releases over `window`
    average_interval: Duration,
    /// Sliding window used for the average
    window: Duration,
    /// Release history. tokio's mutex is fair, so holding it while sleeping
    /// queues later callers in arrival order.
    state: Mutex<LimiterState>,
}

#[derive(Debug, Default)]
struct LimiterState {
    /// Last release timestamp
    last_release: Option<Instant>,
    /// Release timestamps inside the window
    recent_releases: VecDeque<Instant>,
}

impl LimiterState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.recent_releases.front() {
            if now.duration_since(oldest) >= window {
                self.recent_releases.pop_front();
            } else {
                break;
            }
        }
    }
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(min_interval: Duration, average_interval: Duration, window: Duration) -> Self {
        Self {
            min_interval,
            average_interval,
            window,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Create a limiter from the configured millisecond/second values
    pub fn from_config(config: &shared::config::RateLimitConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_interval_ms),
            Duration::from_millis(config.average_interval_ms),
            Duration::from_secs(config.window_seconds),
        )
    }

    /// Number of releases the window may hold before the average kicks in
    fn window_capacity(&self) -> Option<usize> {
        if self.average_interval.is_zero() || self.window.is_zero() {
            return None;
        }

        let capacity = self.window.as_nanos() / self.average_interval.as_nanos();
        Some(capacity.max(1) as usize)
    }

    /// Earliest instant at which the next release satisfies both constraints
    fn ready_at(&self, state: &LimiterState, now: Instant) -> Instant {
        let mut ready = now;

        if let Some(last) = state.last_release {
            ready = ready.max(last + self.min_interval);
        }

        if let Some(capacity) = self.window_capacity() {
            let len = state.recent_releases.len();
            if len >= capacity {
                // The release that must leave the window before we may go
                let blocking = state.recent_releases[len - capacity];
                ready = ready.max(blocking + self.window);
            }
        }

        ready
    }

    /// Wait until a request may be issued and record the release
    ///
    /// Returns the release instant. Cancellation while queued or while
    /// waiting returns [`AniDbError::Cancelled`] and leaves the history as it
    /// was.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<Instant> {
        let mut state = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AniDbError::Cancelled),
            guard = self.state.lock() => guard,
        };

        let now = Instant::now();
        state.prune(now, self.window);

        let ready = self.ready_at(&state, now);
        if ready > now {
            let wait_time = ready - now;
            tracing::debug!(
                wait_ms = wait_time.as_millis() as u64,
                recent = state.recent_releases.len(),
                "Rate limit: waiting before next AniDB request"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AniDbError::Cancelled),
                _ = sleep_until(ready) => {}
            }
        }

        let released = Instant::now();
        state.last_release = Some(released);
        state.recent_releases.push_back(released);

        Ok(released)
    }

    /// Get the current number of releases inside the window
    pub async fn recent_count(&self) -> usize {
        let mut state = self.state.lock().await;
        state.prune(Instant::now(), self.window);
        state.recent_releases.len()
    }
}
