/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::batch::BatchContext;
use crate::config::BotConfig;
use crate::counters::Counters;
use crate::ledger::ProcessedLedger;
use crate::limiter::{normalize_handle, SlidingWindowLimiter};
use crate::target::{extract_reply_target, normalize_pfp_url};
use crate::transform::ImageSource;
use crate::x_api::{ApiError, Mention, XApi};

const MEDIA_FILENAME: &str = "crybb.jpg";
const FALLBACK_TEXT: &str = "Sorry — I couldn't render that one. Try again in a bit! 💛";

pub fn reply_text(target: &str) -> String {
    format!("Welcome to $CRYBB @{target} 🍼\n\nNO CRYING IN THE CASINO.")
}

/// Terminal state of one mention after a pipeline pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionOutcome {
    /// Image reply posted, mention marked processed.
    Replied,
    /// Transform gave up; apology text posted, mention marked processed.
    TextFallback,
    /// Author over the incoming cap; left unprocessed for a later poll.
    RateLimitedAuthor,
    /// Target over the outgoing cap; marked processed, silently dropped.
    RateLimitedTarget,
    /// Target account missing or suspended; marked processed.
    AbsentTarget,
    /// Upload or post failed terminally; left unprocessed for retry.
    PostFailed,
}

impl MentionOutcome {
    /// Whether this outcome retired the mention into the ledger.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Replied | Self::TextFallback | Self::RateLimitedTarget | Self::AbsentTarget
        )
    }
}

/// Per-mention work unit: limiter gates, target resolution, image fetch,
/// upload, threaded reply, ledger mark.
pub struct ReplyPipeline {
    api: Arc<XApi>,
    ledger: Arc<ProcessedLedger>,
    counters: Arc<Counters>,
    image_source: Arc<dyn ImageSource>,
    incoming: SlidingWindowLimiter,
    outgoing: SlidingWindowLimiter,
    slots: Semaphore,
    bot_handle: String,
}

impl ReplyPipeline {
    pub fn new(
        cfg: &BotConfig,
        api: Arc<XApi>,
        ledger: Arc<ProcessedLedger>,
        counters: Arc<Counters>,
        image_source: Arc<dyn ImageSource>,
    ) -> Self {
        Self {
            api,
            ledger,
            counters,
            image_source,
            incoming: SlidingWindowLimiter::new(cfg.per_author_hourly_limit)
                .with_whitelist(cfg.whitelist_handles.clone()),
            outgoing: SlidingWindowLimiter::new(cfg.per_target_hourly_limit),
            slots: Semaphore::new(cfg.ai_max_concurrency),
            bot_handle: cfg.bot_handle.clone(),
        }
    }

    /// Run one mention through the pipeline. An `Err` means the ledger
    /// could not be written; the caller must not advance the watermark.
    pub async fn handle_mention(
        &self,
        mention: &Mention,
        ctx: &BatchContext,
    ) -> Result<MentionOutcome> {
        let author_handle = ctx
            .author_by_id(&mention.author_id)
            .map(|u| u.username)
            .unwrap_or_default();
        info!(
            "processing mention {} from @{}",
            mention.id,
            if author_handle.is_empty() { "?" } else { &author_handle }
        );

        if !self.incoming.allow(&mention.author_id, Some(&author_handle)) {
            info!("author {} over the hourly cap", mention.author_id);
            self.counters.rate_limited_in();
            return Ok(MentionOutcome::RateLimitedAuthor);
        }

        let target = extract_reply_target(&mention.mentions, &self.bot_handle, &author_handle);
        let resolved = if target.is_empty() {
            None
        } else {
            match ctx.resolve_user(&self.api, &target).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("resolving @{target} failed: {e:#}");
                    return self.text_fallback(mention).await;
                }
            }
        };
        let Some(user) = resolved else {
            info!("target @{target} absent, skipping {}", mention.id);
            self.counters.skip_absent_target();
            self.mark_processed(mention)?;
            return Ok(MentionOutcome::AbsentTarget);
        };
        let Some(pfp_raw) = user.profile_image_url.clone() else {
            info!("target @{} has no profile image", user.username);
            self.counters.skip_absent_target();
            self.mark_processed(mention)?;
            return Ok(MentionOutcome::AbsentTarget);
        };
        let pfp_url = normalize_pfp_url(&pfp_raw);

        let target_key = normalize_handle(&user.username);
        if !self.outgoing.allow(&target_key, None) {
            info!("target @{} over the outgoing cap", user.username);
            self.counters.rate_limited_out();
            self.mark_processed(mention)?;
            return Ok(MentionOutcome::RateLimitedTarget);
        }

        let _slot = self
            .slots
            .acquire()
            .await
            .context("pipeline semaphore closed")?;

        let image = match self.image_source.fetch_image(&pfp_url, &mention.text).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("image pipeline gave up for {}: {e:#}", mention.id);
                return self.text_fallback(mention).await;
            }
        };

        match self.post_image_reply(mention, &user.username, image).await {
            Ok(()) => {
                self.mark_processed(mention)?;
                self.counters.processed();
                self.counters.reply_sent();
                info!("replied to {} targeting @{}", mention.id, user.username);
                Ok(MentionOutcome::Replied)
            }
            Err(e) => {
                warn!("posting reply for {} failed: {e:#}", mention.id);
                self.counters.post_fail();
                Ok(MentionOutcome::PostFailed)
            }
        }
    }

    async fn post_image_reply(
        &self,
        mention: &Mention,
        target: &str,
        image: Vec<u8>,
    ) -> Result<(), ApiError> {
        // One extra attempt after a 429; the client already slept out the
        // reset window before returning it.
        let mut uploaded = self.api.media_upload(image.clone(), MEDIA_FILENAME).await;
        if matches!(uploaded, Err(ApiError::RateLimited { .. })) {
            uploaded = self.api.media_upload(image, MEDIA_FILENAME).await;
        }
        let media_id = uploaded?;

        let text = reply_text(target);
        let mut posted = self
            .api
            .create_reply(&text, &mention.id, &[media_id.clone()])
            .await;
        if matches!(posted, Err(ApiError::RateLimited { .. })) {
            posted = self.api.create_reply(&text, &mention.id, &[media_id]).await;
        }
        posted.map(|_| ())
    }

    /// Apology path: the render is lost but the mention is answered and
    /// retired. A failed apology post leaves the mention for retry.
    async fn text_fallback(&self, mention: &Mention) -> Result<MentionOutcome> {
        let mut posted = self.api.create_reply(FALLBACK_TEXT, &mention.id, &[]).await;
        if matches!(posted, Err(ApiError::RateLimited { .. })) {
            posted = self.api.create_reply(FALLBACK_TEXT, &mention.id, &[]).await;
        }
        match posted {
            Ok(_) => {
                self.mark_processed(mention)?;
                self.counters.processed();
                self.counters.ai_fail();
                Ok(MentionOutcome::TextFallback)
            }
            Err(e) => {
                warn!("fallback reply for {} failed: {e:#}", mention.id);
                self.counters.post_fail();
                Ok(MentionOutcome::PostFailed)
            }
        }
    }

    fn mark_processed(&self, mention: &Mention) -> Result<()> {
        self.ledger
            .mark_processed(&mention.id)
            .with_context(|| format!("ledger write for mention {}", mention.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_text_matches_contract() {
        assert_eq!(
            reply_text("alice"),
            "Welcome to $CRYBB @alice 🍼\n\nNO CRYING IN THE CASINO."
        );
    }

    #[test]
    fn fallback_text_matches_contract() {
        assert_eq!(
            FALLBACK_TEXT,
            "Sorry — I couldn't render that one. Try again in a bit! 💛"
        );
    }

    #[test]
    fn outcome_terminality() {
        use MentionOutcome::*;
        for (outcome, processed) in [
            (Replied, true),
            (TextFallback, true),
            (RateLimitedTarget, true),
            (AbsentTarget, true),
            (RateLimitedAuthor, false),
            (PostFailed, false),
        ] {
            assert_eq!(outcome.is_terminal(), processed, "{outcome:?}");
        }
    }
}
