/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Strip a leading `@` and lowercase. All handle comparisons in the
/// engine go through this.
pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_ascii_lowercase()
}

/// Per-key sliding-window counter over one hour. State is process-local;
/// a restart starts every window empty.
pub struct SlidingWindowLimiter {
    capacity: usize,
    window: Duration,
    whitelist: HashSet<String>,
    entries: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(capacity: usize) -> Self {
        Self::with_window(capacity, Duration::from_secs(3600))
    }

    pub fn with_window(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            whitelist: HashSet::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Normalized handles that bypass the limiter entirely.
    pub fn with_whitelist(mut self, whitelist: HashSet<String>) -> Self {
        self.whitelist = whitelist;
        self
    }

    /// Record an event for `key` if the window has room. A whitelisted
    /// `handle` is always allowed and never recorded.
    pub fn allow(&self, key: &str, handle: Option<&str>) -> bool {
        self.allow_at(key, handle, Instant::now())
    }

    fn allow_at(&self, key: &str, handle: Option<&str>, now: Instant) -> bool {
        if let Some(h) = handle {
            if self.whitelist.contains(&normalize_handle(h)) {
                return true;
            }
        }

        let mut g = self.entries.lock().unwrap();
        let dq = g.entry(key.to_string()).or_default();
        prune(dq, now, self.window);
        if dq.len() < self.capacity {
            dq.push_back(now);
            true
        } else {
            false
        }
    }

    /// Events currently inside the window for `key`.
    pub fn count(&self, key: &str) -> usize {
        let mut g = self.entries.lock().unwrap();
        match g.get_mut(key) {
            Some(dq) => {
                prune(dq, Instant::now(), self.window);
                dq.len()
            }
            None => 0,
        }
    }
}

fn prune(dq: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = dq.front() {
        if now.duration_since(*front) >= window {
            dq.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_at_and_case() {
        assert_eq!(normalize_handle("@Alice "), "alice");
        assert_eq!(normalize_handle("BOB"), "bob");
        assert_eq!(normalize_handle(""), "");
    }

    #[test]
    fn capacity_bounds_the_window() {
        let limiter = SlidingWindowLimiter::new(2);
        let now = Instant::now();
        assert!(limiter.allow_at("9", None, now));
        assert!(limiter.allow_at("9", None, now + Duration::from_secs(1)));
        assert!(!limiter.allow_at("9", None, now + Duration::from_secs(2)));
        // Other keys are unaffected.
        assert!(limiter.allow_at("7", None, now + Duration::from_secs(2)));
    }

    #[test]
    fn window_slides_after_an_hour() {
        let limiter = SlidingWindowLimiter::new(1);
        let now = Instant::now();
        assert!(limiter.allow_at("9", None, now));
        assert!(!limiter.allow_at("9", None, now + Duration::from_secs(3599)));
        assert!(limiter.allow_at("9", None, now + Duration::from_secs(3600)));
    }

    #[test]
    fn whitelist_always_allows_and_never_records() {
        let wl: HashSet<String> = ["alice".to_string()].into();
        let limiter = SlidingWindowLimiter::new(1).with_whitelist(wl);
        let now = Instant::now();
        for i in 0..20 {
            assert!(limiter.allow_at("9", Some("@Alice"), now + Duration::from_secs(i)));
        }
        assert_eq!(limiter.count("9"), 0);
    }

    #[test]
    fn rejection_does_not_consume_a_slot() {
        let limiter = SlidingWindowLimiter::new(1);
        let now = Instant::now();
        assert!(limiter.allow_at("t", None, now));
        assert!(!limiter.allow_at("t", None, now + Duration::from_secs(10)));
        assert_eq!(limiter.count("t"), 1);
    }
}
