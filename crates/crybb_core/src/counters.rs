/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Monotonic engine counters. The health surface reads these; nothing in
/// the engine ever decrements them.
#[derive(Default)]
pub struct Counters {
    pub processed: AtomicU64,
    pub replies_sent: AtomicU64,
    pub ai_fail: AtomicU64,
    pub post_fail: AtomicU64,
    pub rate_limited_in: AtomicU64,
    pub rate_limited_out: AtomicU64,
    pub skip_absent_target: AtomicU64,

    last_mention_time: Mutex<Option<String>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reply_sent(&self) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ai_fail(&self) {
        self.ai_fail.fetch_add(1, Ordering::Relaxed);
    }

    pub fn post_fail(&self) {
        self.post_fail.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_limited_in(&self) {
        self.rate_limited_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_limited_out(&self) {
        self.rate_limited_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skip_absent_target(&self) {
        self.skip_absent_target.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_mention_time(&self, created_at: &str) {
        let mut g = self.last_mention_time.lock().unwrap();
        *g = Some(created_at.to_string());
    }

    pub fn last_mention_time(&self) -> Option<String> {
        self.last_mention_time.lock().unwrap().clone()
    }

    pub fn snapshot_json(&self) -> serde_json::Value {
        let last_mention_time = self.last_mention_time.lock().unwrap().clone();
        serde_json::json!({
            "ts_ms": now_ms(),
            "processed": self.processed.load(Ordering::Relaxed),
            "replies_sent": self.replies_sent.load(Ordering::Relaxed),
            "ai_fail": self.ai_fail.load(Ordering::Relaxed),
            "post_fail": self.post_fail.load(Ordering::Relaxed),
            "rate_limited_in": self.rate_limited_in.load(Ordering::Relaxed),
            "rate_limited_out": self.rate_limited_out.load(Ordering::Relaxed),
            "skip_absent_target": self.skip_absent_target.load(Ordering::Relaxed),
            "last_mention_time": last_mention_time,
        })
    }
}
