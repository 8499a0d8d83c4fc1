//! Admission control for outbound brokerage calls.

use crate::config::RateLimitConfig;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Rate limiter using sliding window algorithm.
///
/// At most `capacity` permits are granted in any window of length `window`.
/// Callers over capacity wait until the oldest grant leaves the window;
/// nothing is ever rejected.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    /// Grant timestamps inside the current window, oldest first.
    grants: Mutex<VecDeque<Instant>>,
    granted: AtomicU64,
    waited: AtomicU64,
}

/// Proof of admission for one outbound call.
///
/// Hold it for the duration of the call. The grant is accounted when it is
/// issued, so dropping the permit releases nothing early.
#[derive(Debug)]
#[must_use = "a permit should be held for the call it admits"]
pub struct RatePermit {
    granted_at: Instant,
}

impl RatePermit {
    /// When the permit was granted.
    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }
}

impl RateLimiter {
    /// Creates a limiter granting `capacity` permits per `window`.
    ///
    /// A zero capacity is treated as one.
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1) as usize;
        Self {
            capacity,
            window,
            grants: Mutex::new(VecDeque::with_capacity(capacity)),
            granted: AtomicU64::new(0),
            waited: AtomicU64::new(0),
        }
    }

    /// Creates a limiter from configuration.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.window())
    }

    /// Waits until a permit is available and takes it.
    pub async fn acquire(&self) -> RatePermit {
        loop {
            let wait = match self.try_grant() {
                Ok(permit) => return permit,
                Err(wait) => wait,
            };

            self.waited.fetch_add(1, Ordering::Relaxed);
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Takes a permit if one is available right now.
    pub fn try_acquire(&self) -> Option<RatePermit> {
        self.try_grant().ok()
    }

    /// Number of permits that could be granted right now.
    pub fn available(&self) -> usize {
        let now = Instant::now();
        let mut grants = self.grants.lock();
        self.prune(&mut grants, now);
        self.capacity - grants.len()
    }

    /// Permits per window.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Total permits granted.
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    /// Number of times a caller had to wait.
    pub fn waits(&self) -> u64 {
        self.waited.load(Ordering::Relaxed)
    }

    /// Grants a permit, or returns how long until the oldest grant expires.
    fn try_grant(&self) -> Result<RatePermit, Duration> {
        let now = Instant::now();
        let mut grants = self.grants.lock();
        self.prune(&mut grants, now);

        if grants.len() < self.capacity {
            grants.push_back(now);
            self.granted.fetch_add(1, Ordering::Relaxed);
            return Ok(RatePermit { granted_at: now });
        }

        let wait = grants
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or_default();
        // Sleeping zero would spin without yielding to the timer.
        Err(wait.max(Duration::from_millis(1)))
    }

    fn prune(&self, grants: &mut VecDeque<Instant>, now: Instant) {
        // Remove old entries outside the window
        while let Some(&front) = grants.front() {
            if now.duration_since(front) >= self.window {
                grants.pop_front();
            } else {
                break;
            }
        }
    }
}
