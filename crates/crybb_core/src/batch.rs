/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::x_api::{ApiResult, MentionBatch, UserInfo, XApi};

/// Cross-batch user cache with a 5-minute TTL, keyed by lowercased
/// handle.
pub struct UserCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (UserInfo, Instant)>>,
}

impl UserCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(300))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, username_lc: &str) -> Option<UserInfo> {
        let g = self.entries.lock().unwrap();
        let (user, at) = g.get(username_lc)?;
        if at.elapsed() >= self.ttl {
            return None;
        }
        Some(user.clone())
    }

    pub fn insert(&self, user: UserInfo) {
        let mut g = self.entries.lock().unwrap();
        g.insert(user.username.to_ascii_lowercase(), (user, Instant::now()));
    }

    /// Drop expired entries.
    pub fn prune(&self) {
        let mut g = self.entries.lock().unwrap();
        g.retain(|_, (_, at)| at.elapsed() < self.ttl);
    }
}

impl Default for UserCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-batch resolution context: the immutable expansion snapshot, an
/// overlay of users pinned during this batch, and the global TTL cache.
pub struct BatchContext {
    snapshot: HashMap<String, UserInfo>,
    handle_by_id: HashMap<String, String>,
    pins: Mutex<HashMap<String, UserInfo>>,
    cache: Arc<UserCache>,
}

impl BatchContext {
    pub fn new(batch: &MentionBatch, cache: Arc<UserCache>) -> Self {
        Self {
            snapshot: batch.users_by_handle.clone(),
            handle_by_id: batch.handle_by_id.clone(),
            pins: Mutex::new(HashMap::new()),
            cache,
        }
    }

    /// The author record for an author id, from the expansion snapshot.
    pub fn author_by_id(&self, author_id: &str) -> Option<UserInfo> {
        let handle = self.handle_by_id.get(author_id)?;
        self.snapshot.get(handle).cloned()
    }

    /// Snapshot, then pins, then the global cache. No network.
    pub fn lookup_local(&self, username: &str) -> Option<UserInfo> {
        let key = username.to_ascii_lowercase();
        if let Some(u) = self.snapshot.get(&key) {
            return Some(u.clone());
        }
        if let Some(u) = self.pins.lock().unwrap().get(&key) {
            return Some(u.clone());
        }
        self.cache.get(&key)
    }

    /// Resolve a user, going to the network only when every local layer
    /// misses. A successful fetch is pinned for this batch and cached
    /// globally. `Ok(None)` means the account is absent (404 or
    /// suspended).
    pub async fn resolve_user(&self, api: &XApi, username: &str) -> ApiResult<Option<UserInfo>> {
        if let Some(u) = self.lookup_local(username) {
            debug!("resolved @{username} locally");
            return Ok(Some(u));
        }
        let Some(user) = api.get_user_by_username(username).await? else {
            return Ok(None);
        };
        let key = user.username.to_ascii_lowercase();
        self.pins.lock().unwrap().insert(key, user.clone());
        self.cache.insert(user.clone());
        Ok(Some(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x_api::MentionBatch;

    fn user(id: &str, username: &str, pfp: Option<&str>) -> UserInfo {
        UserInfo {
            id: id.to_string(),
            username: username.to_string(),
            name: username.to_string(),
            profile_image_url: pfp.map(|s| s.to_string()),
        }
    }

    fn batch_with(users: &[UserInfo]) -> MentionBatch {
        let mut batch = MentionBatch::default();
        for u in users {
            let key = u.username.to_ascii_lowercase();
            batch.handle_by_id.insert(u.id.clone(), key.clone());
            batch.users_by_handle.insert(key, u.clone());
        }
        batch
    }

    #[test]
    fn snapshot_lookup_is_case_insensitive() {
        let batch = batch_with(&[user("7", "Alice", None)]);
        let ctx = BatchContext::new(&batch, Arc::new(UserCache::new()));
        assert_eq!(ctx.lookup_local("ALICE").unwrap().id, "7");
        assert!(ctx.lookup_local("bob").is_none());
    }

    #[test]
    fn author_resolves_through_id_index() {
        let batch = batch_with(&[user("9", "Eve", None)]);
        let ctx = BatchContext::new(&batch, Arc::new(UserCache::new()));
        assert_eq!(ctx.author_by_id("9").unwrap().username, "Eve");
        assert!(ctx.author_by_id("404").is_none());
    }

    #[test]
    fn cache_serves_across_batches_until_ttl() {
        let cache = Arc::new(UserCache::with_ttl(Duration::from_secs(300)));
        cache.insert(user("7", "Alice", None));

        let empty = MentionBatch::default();
        let ctx = BatchContext::new(&empty, cache.clone());
        assert_eq!(ctx.lookup_local("alice").unwrap().id, "7");
    }

    #[test]
    fn expired_cache_entries_miss() {
        let cache = UserCache::with_ttl(Duration::from_secs(0));
        cache.insert(user("7", "Alice", None));
        assert!(cache.get("alice").is_none());
        cache.prune();
    }
}
