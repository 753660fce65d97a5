use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

/// Per-backend call budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub min_interval: Duration,
    pub max_per_minute: usize,
}

impl RateLimit {
    pub const fn new(min_interval: Duration, max_per_minute: usize) -> Self {
        Self { min_interval, max_per_minute }
    }

    /// Gemini free tier.
    pub const fn gemini() -> Self {
        Self::new(Duration::from_secs(7), 8)
    }

    pub const fn standard() -> Self {
        Self::new(Duration::from_secs(1), 30)
    }

    pub const fn unlimited() -> Self {
        Self::new(Duration::ZERO, usize::MAX)
    }
}

/// Enforces a minimum spacing between calls and a cap on calls in any
/// rolling sixty-second window. Callers wait rather than fail.
#[derive(Debug)]
pub struct RateLimiter {
    limit: RateLimit,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Sleep until a call is allowed, then record it.
    ///
    /// The lock is held across the sleep so that concurrent callers queue
    /// up behind each other instead of all waking at the same instant.
    pub async fn acquire(&self) {
        let mut calls = self.calls.lock().await;
        loop {
            let now = Instant::now();
            while calls.front().is_some_and(|t| now.duration_since(*t) >= WINDOW) {
                calls.pop_front();
            }

            let mut wait = Duration::ZERO;
            if let Some(last) = calls.back() {
                let since = now.duration_since(*last);
                if since < self.limit.min_interval {
                    wait = self.limit.min_interval - since;
                }
            }
            if calls.len() >= self.limit.max_per_minute {
                if let Some(oldest) = calls.front() {
                    wait = wait.max(WINDOW - now.duration_since(*oldest));
                }
            }

            if wait.is_zero() {
                calls.push_back(now);
                return;
            }
            debug!("Rate limit reached, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }
}
