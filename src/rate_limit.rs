use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Sliding-window limiter for webhook deliveries, keyed by repository
#[derive(Debug, Default)]
pub struct RateLimiter {
    /// delivery timestamps per repository identity
    requests: HashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a delivery for `key` unless `max` deliveries already happened
    /// within the last `window_secs`. Returns `true` if the limit is exceeded.
    pub fn check_rate_limit(&mut self, key: &str, max: usize, window_secs: u64) -> bool {
        self.check_at(key, max, Duration::from_secs(window_secs), Instant::now())
    }

    fn check_at(&mut self, key: &str, max: usize, window: Duration, now: Instant) -> bool {
        // Forget repositories that went quiet
        self.requests
            .retain(|_, stamps| stamps.last().is_some_and(|&t| now.duration_since(t) < window));

        let timestamps = self.requests.entry(key.to_string()).or_default();
        timestamps.retain(|&t| now.duration_since(t) < window);

        if timestamps.len() < max {
            timestamps.push(now);
            false
        } else {
            true
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_per_repository() {
        let mut limiter = RateLimiter::new();
        let window = Duration::from_secs(60);
        let now = Instant::now();

        assert!(!limiter.check_at("github.com:a/b", 2, window, now));
        assert!(!limiter.check_at("github.com:a/b", 2, window, now));
        assert!(limiter.check_at("github.com:a/b", 2, window, now));
        assert!(!limiter.check_at("github.com:a/c", 2, window, now));
    }

    #[test]
    fn window_slides() {
        let mut limiter = RateLimiter::new();
        let window = Duration::from_secs(10);
        let start = Instant::now();

        assert!(!limiter.check_at("repo", 1, window, start));
        assert!(limiter.check_at("repo", 1, window, start + Duration::from_secs(5)));
        assert!(!limiter.check_at("repo", 1, window, start + Duration::from_secs(11)));
    }

    #[test]
    fn quiet_repositories_are_forgotten() {
        let mut limiter = RateLimiter::new();
        let window = Duration::from_secs(10);
        let start = Instant::now();

        limiter.check_at("a", 5, window, start);
        limiter.check_at("b", 5, window, start + Duration::from_secs(20));
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
