/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use rand::{thread_rng, Rng};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchContext, UserCache};
use crate::config::BotConfig;
use crate::counters::Counters;
use crate::ledger::ProcessedLedger;
use crate::pipeline::{MentionOutcome, ReplyPipeline};
use crate::ratelimit::RateLimitRegistry;
use crate::repost::Reposter;
use crate::x_api::{ApiError, MentionBatch, XApi};

/// The cadence stays awake while any of this many trailing iterations
/// found mentions.
const ACTIVITY_WINDOW: usize = 3;

const MAX_CONSECUTIVE_ERRORS: u32 = 5;
const ERROR_BACKOFF_CAP: Duration = Duration::from_secs(300);

/// The polling loop: one batch iteration at a time, pipelines fanned out
/// per mention, watermark advanced once all outcomes are known.
pub struct Scheduler {
    cfg: Arc<BotConfig>,
    api: Arc<XApi>,
    pipeline: Arc<ReplyPipeline>,
    ledger: Arc<ProcessedLedger>,
    counters: Arc<Counters>,
    cache: Arc<UserCache>,
    registry: Arc<RateLimitRegistry>,
    reposter: Arc<Reposter>,
    shutdown: watch::Receiver<bool>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<BotConfig>,
        api: Arc<XApi>,
        pipeline: Arc<ReplyPipeline>,
        ledger: Arc<ProcessedLedger>,
        counters: Arc<Counters>,
        cache: Arc<UserCache>,
        registry: Arc<RateLimitRegistry>,
        reposter: Arc<Reposter>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cfg,
            api,
            pipeline,
            ledger,
            counters,
            cache,
            registry,
            reposter,
            shutdown,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn run(self) -> Result<()> {
        let mut recent_activity: VecDeque<bool> = VecDeque::with_capacity(ACTIVITY_WINDOW);
        let mut consecutive_errors: u32 = 0;
        let mut error_backoff = Duration::from_secs(1);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.registry.maybe_sleep("users/mentions").await;
            if *self.shutdown.borrow() {
                break;
            }

            let since_id = self.ledger.since_id();
            debug!("polling mentions since {:?}", since_id);

            let batch = {
                let identity = self.api.get_me().await;
                match identity {
                    Ok(identity) => {
                        self.api
                            .get_mentions(&identity.id, since_id.as_deref())
                            .await
                    }
                    Err(e) => Err(e),
                }
            };

            let batch = match batch {
                Ok(b) => {
                    consecutive_errors = 0;
                    error_backoff = Duration::from_secs(1);
                    b
                }
                Err(ApiError::RateLimited { endpoint, .. }) => {
                    // The client already slept out the reset window.
                    info!("{endpoint} rate limited, retrying the poll");
                    continue;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!("poll failed (attempt {consecutive_errors}): {e:#}");
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        warn!("too many consecutive poll errors, backing off hard");
                        self.sleep_interruptible(ERROR_BACKOFF_CAP).await;
                        consecutive_errors = 0;
                    } else {
                        self.sleep_interruptible(error_backoff).await;
                        error_backoff = (error_backoff * 2).min(ERROR_BACKOFF_CAP);
                    }
                    continue;
                }
            };

            let found = !batch.mentions.is_empty();
            if found {
                info!("found {} mentions", batch.mentions.len());
                self.process_batch(batch).await;
            } else {
                debug!("no new mentions");
            }

            if recent_activity.len() == ACTIVITY_WINDOW {
                recent_activity.pop_front();
            }
            recent_activity.push_back(found);
            let quiet = !recent_activity.iter().any(|v| *v);

            if quiet {
                self.spawn_repost_pass();
            }
            self.cadence_sleep(quiet).await;
        }

        info!("scheduler stopped");
        Ok(())
    }

    /// Dispatch one batch in ascending id order, wait for every outcome,
    /// then advance the watermark. A ledger write failure poisons the
    /// batch: the watermark stays put and the next poll re-fetches.
    async fn process_batch(&self, batch: MentionBatch) {
        let batch_ids: Vec<String> = batch.mentions.iter().map(|m| m.id.clone()).collect();
        if let Some(ts) = batch
            .mentions
            .last()
            .and_then(|m| m.created_at.as_deref())
        {
            self.counters.set_last_mention_time(ts);
        }

        let ctx = Arc::new(BatchContext::new(&batch, self.cache.clone()));
        let mut tasks: JoinSet<Result<MentionOutcome>> = JoinSet::new();

        for mention in batch.mentions {
            if *self.shutdown.borrow() {
                break;
            }
            if self.ledger.is_processed(&mention.id) {
                debug!("mention {} already processed", mention.id);
                continue;
            }
            {
                let mut g = self.in_flight.lock().unwrap();
                if !g.insert(mention.id.clone()) {
                    continue;
                }
            }

            let pipeline = self.pipeline.clone();
            let ctx = ctx.clone();
            let in_flight = self.in_flight.clone();
            tasks.spawn(async move {
                let res = pipeline.handle_mention(&mention, &ctx).await;
                in_flight.lock().unwrap().remove(&mention.id);
                res
            });
        }

        let mut ledger_failed = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => debug!("mention outcome: {outcome:?}"),
                Ok(Err(e)) => {
                    error!("ledger write failed, aborting batch: {e:#}");
                    ledger_failed = true;
                }
                Err(e) => {
                    error!("pipeline task failed: {e}");
                    ledger_failed = true;
                }
            }
        }

        if ledger_failed {
            warn!("watermark not advanced for this batch");
            return;
        }
        match self.ledger.advance_watermark(&batch_ids) {
            Ok(Some(id)) => info!("watermark advanced to {id}"),
            Ok(None) => debug!("watermark unchanged"),
            Err(e) => error!("watermark write failed: {e:#}"),
        }
    }

    fn spawn_repost_pass(&self) {
        let reposter = self.reposter.clone();
        let api = self.api.clone();
        tokio::spawn(async move {
            let identity = match api.get_me().await {
                Ok(v) => v,
                Err(e) => {
                    warn!("repost pass skipped, identity unavailable: {e:#}");
                    return;
                }
            };
            if let Err(e) = reposter.run_once(&identity.id).await {
                warn!("repost pass failed: {e:#}");
            }
        });
    }

    async fn cadence_sleep(&self, quiet: bool) {
        let (lo, hi) = if quiet {
            (self.cfg.sleeper_min_secs, self.cfg.sleeper_max_secs)
        } else {
            (self.cfg.awake_min_secs, self.cfg.awake_max_secs)
        };
        let secs = if hi > lo {
            thread_rng().gen_range(lo..=hi)
        } else {
            lo
        };
        debug!(
            "sleeping {secs}s ({})",
            if quiet { "quiet" } else { "awake" }
        );
        self.sleep_interruptible(Duration::from_secs(secs)).await;
    }

    async fn sleep_interruptible(&self, d: Duration) {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(d) => {}
            _ = shutdown.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_window_drives_quiet_mode() {
        let mut recent: VecDeque<bool> = VecDeque::with_capacity(ACTIVITY_WINDOW);
        let push = |v: bool, recent: &mut VecDeque<bool>| {
            if recent.len() == ACTIVITY_WINDOW {
                recent.pop_front();
            }
            recent.push_back(v);
            !recent.iter().any(|x| *x)
        };

        assert!(push(false, &mut recent));
        assert!(!push(true, &mut recent));
        assert!(!push(false, &mut recent));
        assert!(!push(false, &mut recent));
        // The hit from three iterations ago has rolled out of the window.
        assert!(push(false, &mut recent));
    }
}
