/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::x_api::{ApiError, XApi};

/// Quiet-period engagement: re-post the bot's own posts once they pick up
/// enough likes. The seen-set is process-local, so a restart may repeat
/// work; that is accepted over keeping another ledger.
pub struct Reposter {
    api: Arc<XApi>,
    like_threshold: u32,
    seen: Mutex<HashSet<String>>,
}

impl Reposter {
    pub fn new(api: Arc<XApi>, like_threshold: u32) -> Self {
        Self {
            api,
            like_threshold,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// One pass over the bot's recent timeline. Per-post failures are
    /// logged and do not stop the pass.
    pub async fn run_once(&self, bot_id: &str) -> Result<()> {
        let posts = self.api.get_own_timeline(bot_id).await?;
        debug!("repost pass over {} posts", posts.len());

        for post in posts {
            if post.like_count < u64::from(self.like_threshold) {
                continue;
            }
            if self.seen.lock().unwrap().contains(&post.id) {
                continue;
            }

            match self.api.repost(&post.id).await {
                Ok(()) => {
                    info!("reposted {} ({} likes)", post.id, post.like_count);
                    self.seen.lock().unwrap().insert(post.id);
                }
                Err(ApiError::Client { status, .. }) => {
                    // Typically "already retweeted"; no point trying again
                    // this session.
                    debug!("repost of {} refused ({status})", post.id);
                    self.seen.lock().unwrap().insert(post.id);
                }
                Err(e) => {
                    warn!("repost of {} failed: {e:#}", post.id);
                }
            }
        }
        Ok(())
    }
}
