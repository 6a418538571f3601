//! Fixed-window rate limiting.
//!
//! Keyed counters over fixed windows with a monotonic reset time — no
//! token-bucket refill. Keys compose `{tenant}:{endpoint}:{identifier}` where
//! the identifier is an IP, an email, or a client ID depending on the
//! endpoint. A denied decision stays denied for the remainder of the window.

use dashmap::DashMap;

use oxidp_core::UnixMillis;

use crate::config::WindowPolicy;
use crate::error::{AuthError, AuthResult};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the operation may proceed.
    pub allowed: bool,

    /// Operations left in the current window (0 when denied).
    pub remaining: u32,

    /// When the current window resets.
    pub reset_at: UnixMillis,
}

impl Decision {
    /// Seconds until reset, rounded up; the `Retry-After` value.
    #[must_use]
    pub fn retry_after_secs(&self, now: UnixMillis) -> i64 {
        (self.reset_at.millis_since(now) + 999) / 1000
    }
}

#[derive(Debug)]
struct Window {
    started_at: UnixMillis,
    count: u32,
}

/// Keyed fixed-window counters.
#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Composes the canonical key for a check.
    #[must_use]
    pub fn key(tenant: &str, endpoint: &str, identifier: &str) -> String {
        format!("{tenant}:{endpoint}:{identifier}")
    }

    /// Counts one operation against the key's window.
    #[must_use]
    pub fn check(&self, key: &str, policy: &WindowPolicy) -> Decision {
        let now = UnixMillis::now();
        let window_ms = policy.window.as_millis() as i64;

        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });

        // Window rolled over: reset in place.
        if now.millis_since(entry.started_at) >= window_ms {
            entry.started_at = now;
            entry.count = 0;
        }

        let reset_at = UnixMillis::from_millis(entry.started_at.as_millis() + window_ms);
        if entry.count >= policy.max {
            return Decision {
                allowed: false,
                remaining: 0,
                reset_at,
            };
        }

        entry.count += 1;
        Decision {
            allowed: true,
            remaining: policy.max - entry.count,
            reset_at,
        }
    }

    /// Checks and converts denial into a `RateLimited` error carrying
    /// `Retry-After`.
    ///
    /// # Errors
    ///
    /// `RateLimited` when the window is exhausted.
    pub fn enforce(&self, key: &str, policy: &WindowPolicy) -> AuthResult<Decision> {
        let decision = self.check(key, policy);
        if decision.allowed {
            Ok(decision)
        } else {
            Err(AuthError::RateLimited {
                retry_after_secs: decision.retry_after_secs(UnixMillis::now()),
            })
        }
    }

    /// Drops stale windows. Policies are not known here, so anything older
    /// than a day is safe to forget; a reset window denies nothing it
    /// shouldn't.
    pub fn sweep(&self) {
        let now = UnixMillis::now();
        self.windows
            .retain(|_, w| now.millis_since(w.started_at) < 24 * 3600 * 1000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy(max: u32) -> WindowPolicy {
        WindowPolicy::new(Duration::from_secs(60), max)
    }

    #[test]
    fn test_counts_down_remaining() {
        let limiter = RateLimiter::new();
        let key = RateLimiter::key("acme", "token", "public-spa");
        let p = policy(3);

        assert_eq!(limiter.check(&key, &p).remaining, 2);
        assert_eq!(limiter.check(&key, &p).remaining, 1);
        assert_eq!(limiter.check(&key, &p).remaining, 0);
        let denied = limiter.check(&key, &p);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[test]
    fn test_denial_is_sticky_within_window() {
        let limiter = RateLimiter::new();
        let key = RateLimiter::key("acme", "send-email", "a@example.com");
        let p = policy(1);

        assert!(limiter.check(&key, &p).allowed);
        // Once denied, every further call in the window is denied.
        for _ in 0..10 {
            assert!(!limiter.check(&key, &p).allowed);
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new();
        let p = policy(1);
        assert!(limiter.check(&RateLimiter::key("acme", "token", "a"), &p).allowed);
        assert!(limiter.check(&RateLimiter::key("acme", "token", "b"), &p).allowed);
        assert!(limiter.check(&RateLimiter::key("zeta", "token", "a"), &p).allowed);
        assert!(!limiter.check(&RateLimiter::key("acme", "token", "a"), &p).allowed);
    }

    #[test]
    fn test_window_rollover_resets() {
        let limiter = RateLimiter::new();
        let key = "k";
        let p = WindowPolicy::new(Duration::from_millis(0), 1);

        assert!(limiter.check(key, &p).allowed);
        // Zero-length window: the next check starts a fresh window.
        assert!(limiter.check(key, &p).allowed);
    }

    #[test]
    fn test_enforce_carries_retry_after() {
        let limiter = RateLimiter::new();
        let p = policy(1);
        limiter.enforce("k", &p).unwrap();
        let err = limiter.enforce("k", &p).unwrap_err();
        match err {
            AuthError::RateLimited { retry_after_secs } => {
                assert!(retry_after_secs > 0 && retry_after_secs <= 60);
            }
            other => panic!("expected RateLimited, got {other}"),
        }
    }

    #[test]
    fn test_reset_at_is_monotonic_within_window() {
        let limiter = RateLimiter::new();
        let p = policy(5);
        let first = limiter.check("k", &p);
        let second = limiter.check("k", &p);
        assert_eq!(first.reset_at, second.reset_at);
    }
}
