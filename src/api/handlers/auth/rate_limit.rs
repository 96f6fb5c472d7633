//! Fixed-window rate limiting for auth routes.
//!
//! Each limiter owns a name, a limit and a window. Counters are keyed by
//! `"{name}:{identifier}"` so limiters sharing one [`CounterStore`] never see
//! each other's traffic. Windows reset at their boundary; there is no smoothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error};

// Prune stale windows once the map grows past this many keys.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

/// Counter backend. `increment` must update and compare in one atomic step.
pub trait CounterStore: Send + Sync {
    /// Count a request for `key` in its current window and return the count.
    ///
    /// Once the count is above `cap` it is no longer incremented, so a flood of
    /// rejected requests does not grow the counter.
    fn increment(&self, key: &str, window: Duration, cap: u32) -> u32;
}

#[derive(Debug)]
struct Window {
    count: u32,
    started_at: Instant,
}

/// In-process counter store guarded by a single mutex.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(&self, key: &str, window: Duration, cap: u32) -> u32 {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("rate limit counters poisoned, recovering");
                poisoned.into_inner()
            }
        };

        let now = Instant::now();
        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, entry| now.duration_since(entry.started_at) < window);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started_at: now,
        });

        if now.duration_since(entry.started_at) >= window {
            entry.count = 0;
            entry.started_at = now;
        }

        if entry.count <= cap {
            entry.count += 1;
        }
        entry.count
    }
}

/// A named fixed-window limiter.
#[derive(Clone)]
pub struct RateLimiter {
    name: &'static str,
    limit: u32,
    window: Duration,
    store: Arc<dyn CounterStore>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("limit", &self.limit)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(
        name: &'static str,
        limit: u32,
        window: Duration,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            name,
            limit,
            window,
            store,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count one request from `identifier` and decide whether it may proceed.
    #[must_use]
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        let key = format!("{}:{identifier}", self.name);
        let count = self.store.increment(&key, self.window, self.limit);
        if count > self.limit {
            debug!(limiter = self.name, identifier, "rate limited");
            RateLimitDecision::Limited
        } else {
            RateLimitDecision::Allowed
        }
    }
}

/// Limiters per route. Login and signup share the `auth_limit` but keep
/// separate counters.
#[derive(Clone, Debug)]
pub struct RateLimits {
    pub login: RateLimiter,
    pub signup: RateLimiter,
    pub logout: RateLimiter,
    pub session: RateLimiter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub auth_limit: u32,
    pub logout_limit: u32,
    pub session_limit: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth_limit: 5,
            logout_limit: 20,
            session_limit: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimits {
    #[must_use]
    pub fn new(config: RateLimitConfig, store: Arc<dyn CounterStore>) -> Self {
        Self {
            login: RateLimiter::new("login", config.auth_limit, config.window, store.clone()),
            signup: RateLimiter::new("signup", config.auth_limit, config.window, store.clone()),
            logout: RateLimiter::new("logout", config.logout_limit, config.window, store.clone()),
            session: RateLimiter::new("session", config.session_limit, config.window, store),
        }
    }
}
