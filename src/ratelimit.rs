//! Per-identity fixed-window rate limiting
//!
//! Each identity gets a window of `capacity` requests that opens on first
//! sight and lasts `window`. State lives in a sharded map, so checks for
//! different identities rarely contend, and is lost on restart.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const DEFAULT_CAPACITY: u32 = 20;

pub const DEFAULT_WINDOW: TimeDelta = TimeDelta::hours(1);

/// Source of wall-clock time for the limiter.
///
/// Implementations should never go backwards by more than clock skew;
/// a jump back only lengthens open windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Cloned handles share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per window. Must be at least 1.
    pub capacity: u32,
    pub window: TimeDelta,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            window: DEFAULT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RateWindow {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Result of a [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window after this one.
    pub remaining: u32,
    /// When the current window closes.
    pub reset_at: DateTime<Utc>,
}

pub struct RateLimiter<C = SystemClock> {
    config: RateLimitConfig,
    clock: C,
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter<SystemClock> {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(config: RateLimitConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Count one request from `identity` and decide whether it may proceed.
    ///
    /// Denied requests are not counted. The read-modify-write happens under
    /// the entry's shard lock, so concurrent checks for one identity can
    /// never admit more than `capacity` requests per window.
    pub fn check(&self, identity: &str) -> RateDecision {
        let now = self.clock.now();
        let fresh = RateWindow {
            count: 0,
            reset_at: now
                .checked_add_signed(self.config.window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        let mut window = self.windows.entry(identity.to_owned()).or_insert(fresh);
        if window.reset_at <= now {
            *window = fresh;
        }

        if window.count >= self.config.capacity {
            debug!(reset_at = %window.reset_at.to_rfc3339(), "rate limit exceeded");
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_at: window.reset_at,
            };
        }

        window.count += 1;
        RateDecision {
            allowed: true,
            remaining: self.config.capacity - window.count,
            reset_at: window.reset_at,
        }
    }

    /// Drop every window that has already closed. Returns how many went.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, window| window.reset_at > now);
        // Concurrent inserts can make the map grow while we sweep.
        before.saturating_sub(self.windows.len())
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Run [`RateLimiter::cleanup`] every `period` until the handle is aborted.
///
/// Must be called inside a tokio runtime.
pub fn spawn_sweeper<C>(limiter: Arc<RateLimiter<C>>, period: Duration) -> JoinHandle<()>
where
    C: Clock + 'static,
{
    // tokio panics on a zero period
    let period = period.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let removed = limiter.cleanup();
            if removed > 0 {
                info!(removed, remaining = limiter.len(), "swept expired rate windows");
            }
        }
    })
}
