/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Extra seconds slept past the advertised reset, so we never race the
/// window boundary.
pub const RESET_SLACK_SECS: u64 = 5;

/// Calls are held back once `remaining` drops below this.
pub const MIN_REMAINING: u32 = 2;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_unix: u64,
    pub last_seen_unix: u64,
}

/// Per-endpoint quota state, fed by every API response. Entries are never
/// evicted; an endpoint with no observed response has no entry and is
/// never held back.
pub struct RateLimitRegistry {
    limits: Mutex<HashMap<&'static str, RateLimitInfo>>,
    shutdown: watch::Receiver<bool>,
}

impl RateLimitRegistry {
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            limits: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Record the `x-rate-limit-*` headers of a response. Responses without
    /// the full header triple leave the entry untouched.
    pub fn observe(&self, endpoint: &'static str, headers: &HeaderMap) {
        let Some(limit) = header_u64(headers, "x-rate-limit-limit") else {
            return;
        };
        let Some(remaining) = header_u64(headers, "x-rate-limit-remaining") else {
            return;
        };
        let Some(reset_unix) = header_u64(headers, "x-rate-limit-reset") else {
            return;
        };
        if limit == 0 {
            return;
        }
        let info = RateLimitInfo {
            limit: limit as u32,
            remaining: remaining as u32,
            reset_unix,
            last_seen_unix: now_unix(),
        };
        debug!(
            "rate limit {}: {}/{} reset={}",
            endpoint, info.remaining, info.limit, info.reset_unix
        );
        let mut g = self.limits.lock().unwrap();
        g.insert(endpoint, info);
    }

    pub fn get(&self, endpoint: &str) -> Option<RateLimitInfo> {
        self.limits.lock().unwrap().get(endpoint).copied()
    }

    /// Block until the endpoint's window resets when fewer than
    /// `MIN_REMAINING` calls are left. Interrupted early by shutdown.
    pub async fn maybe_sleep(&self, endpoint: &str) {
        let Some(info) = self.get(endpoint) else {
            return;
        };
        if info.remaining >= MIN_REMAINING {
            return;
        }
        info!(
            "rate limit low on {} ({}/{}), sleeping until reset",
            endpoint, info.remaining, info.limit
        );
        self.sleep_until_reset(info.reset_unix).await;
    }

    /// Sleep until `reset_unix + RESET_SLACK_SECS`, or until shutdown.
    pub async fn sleep_until_reset(&self, reset_unix: u64) {
        let now = now_unix();
        let wake = reset_unix.saturating_add(RESET_SLACK_SECS);
        if wake <= now {
            return;
        }
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(wake - now)) => {}
            _ = shutdown.changed() => {}
        }
    }

    pub fn snapshot(&self) -> HashMap<&'static str, RateLimitInfo> {
        self.limits.lock().unwrap().clone()
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn registry() -> RateLimitRegistry {
        let (tx, rx) = watch::channel(false);
        // The receiver must outlive the sender for shutdown selects.
        std::mem::forget(tx);
        RateLimitRegistry::new(rx)
    }

    fn headers(limit: &str, remaining: &str, reset: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("x-rate-limit-limit", HeaderValue::from_str(limit).unwrap());
        h.insert(
            "x-rate-limit-remaining",
            HeaderValue::from_str(remaining).unwrap(),
        );
        h.insert("x-rate-limit-reset", HeaderValue::from_str(reset).unwrap());
        h
    }

    #[test]
    fn observe_tracks_last_seen_headers() {
        let reg = registry();
        reg.observe("users/mentions", &headers("180", "179", "1700000000"));
        reg.observe("users/mentions", &headers("180", "178", "1700000000"));

        let info = reg.get("users/mentions").unwrap();
        assert_eq!(info.limit, 180);
        assert_eq!(info.remaining, 178);
        assert_eq!(info.reset_unix, 1_700_000_000);
    }

    #[test]
    fn observe_ignores_partial_headers() {
        let reg = registry();
        let mut h = HeaderMap::new();
        h.insert("x-rate-limit-limit", HeaderValue::from_static("180"));
        reg.observe("tweets", &h);
        assert!(reg.get("tweets").is_none());
    }

    #[tokio::test]
    async fn maybe_sleep_passes_when_quota_healthy() {
        let reg = registry();
        reg.observe("users/mentions", &headers("180", "50", "1700000000"));
        // Returns immediately; a stuck sleep would hang the test.
        reg.maybe_sleep("users/mentions").await;
    }

    #[tokio::test]
    async fn sleep_until_past_reset_returns_immediately() {
        let reg = registry();
        reg.sleep_until_reset(now_unix().saturating_sub(60)).await;
    }
}
