use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug)]
struct Entry {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Fixed-window request counter, keyed by caller-composed strings like
/// `send_sms:admin:+31600000001`.
///
/// One instance per process; construct and inject it, never reach for a
/// global. The table is NOT shared across instances, so with N instances
/// the effective ceiling is N * max_requests. That scoping is accepted:
/// the limit here protects this process, not the fleet.
pub struct RateLimiter {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str, cfg: &RateLimitConfig) -> RateLimitDecision {
        self.check_at(key, cfg, Utc::now())
    }

    /// Same as `check` but with the clock passed in, so tests can drive
    /// window expiry without sleeping.
    pub fn check_at(&self, key: &str, cfg: &RateLimitConfig, now: DateTime<Utc>) -> RateLimitDecision {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        // Amortized cleanup: drop every expired window on each call rather
        // than running a separate eviction timer.
        entries.retain(|_, e| e.reset_at > now);

        match entries.get_mut(key) {
            None => {
                let reset_at = now + cfg.window;
                entries.insert(
                    key.to_string(),
                    Entry {
                        count: 1,
                        reset_at,
                    },
                );
                RateLimitDecision {
                    allowed: true,
                    remaining: cfg.max_requests.saturating_sub(1),
                    reset_at,
                    error: None,
                }
            }
            Some(entry) => {
                if entry.count >= cfg.max_requests {
                    RateLimitDecision {
                        allowed: false,
                        remaining: 0,
                        reset_at: entry.reset_at,
                        error: Some(format!(
                            "rate limit exceeded for {key}, retry after {}",
                            entry.reset_at.to_rfc3339()
                        )),
                    }
                } else {
                    entry.count += 1;
                    RateLimitDecision {
                        allowed: true,
                        remaining: cfg.max_requests - entry.count,
                        reset_at: entry.reset_at,
                        error: None,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max: u32, secs: i64) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: max,
            window: Duration::seconds(secs),
        }
    }

    #[test]
    fn denies_after_max_requests_in_one_window() {
        let limiter = RateLimiter::new();
        let c = cfg(3, 60);
        let now = Utc::now();

        for i in 0..3 {
            let d = limiter.check_at("k", &c, now);
            assert!(d.allowed, "request {i} should be allowed");
            assert_eq!(d.remaining, 2 - i);
        }

        let denied = limiter.check_at("k", &c, now);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.error.is_some());
        assert_eq!(denied.reset_at, now + Duration::seconds(60));
    }

    #[test]
    fn fresh_window_after_reset_elapses() {
        let limiter = RateLimiter::new();
        let c = cfg(1, 60);
        let now = Utc::now();

        assert!(limiter.check_at("k", &c, now).allowed);
        assert!(!limiter.check_at("k", &c, now).allowed);

        let later = now + Duration::seconds(61);
        let d = limiter.check_at("k", &c, later);
        assert!(d.allowed, "new window should start after reset_at");
        assert_eq!(d.reset_at, later + Duration::seconds(60));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        let c = cfg(1, 60);
        let now = Utc::now();

        assert!(limiter.check_at("a", &c, now).allowed);
        assert!(limiter.check_at("b", &c, now).allowed);
        assert!(!limiter.check_at("a", &c, now).allowed);
    }

    #[test]
    fn expired_entries_are_purged_on_any_call() {
        let limiter = RateLimiter::new();
        let c = cfg(1, 10);
        let now = Utc::now();

        limiter.check_at("stale", &c, now);
        assert_eq!(limiter.entries.lock().unwrap().len(), 1);

        // A call on a different key after expiry sweeps the stale one out.
        limiter.check_at("fresh", &c, now + Duration::seconds(11));
        let entries = limiter.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("fresh"));
    }
}
