/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use crybb_core::batch::UserCache;
use crybb_core::config::BotConfig;
use crybb_core::counters::Counters;
use crybb_core::ledger::ProcessedLedger;
use crybb_core::oauth1::OAuth1Creds;
use crybb_core::pipeline::ReplyPipeline;
use crybb_core::ratelimit::RateLimitRegistry;
use crybb_core::repost::Reposter;
use crybb_core::scheduler::Scheduler;
use crybb_core::transform::{build_image_source, ImageSource};
use crybb_core::x_api::XApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Arc::new(BotConfig::from_env().context("load configuration")?);
    info!(
        "crybb service starting: @{} pipeline={:?} outbox={}",
        cfg.bot_handle,
        cfg.image_pipeline,
        cfg.outbox_dir.display()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.http_timeout_secs))
        .build()
        .context("build http client")?;

    let registry = Arc::new(RateLimitRegistry::new(shutdown_rx.clone()));
    let counters = Arc::new(Counters::new());
    let cache = Arc::new(UserCache::new());
    let ledger = Arc::new(ProcessedLedger::open(&cfg.outbox_dir)?);

    let creds = OAuth1Creds {
        consumer_key: cfg.api_key.clone(),
        consumer_secret: cfg.api_secret.clone(),
        access_token: cfg.access_token.clone(),
        access_secret: cfg.access_secret.clone(),
    };
    let api = Arc::new(XApi::new(
        http.clone(),
        cfg.bearer_token.clone(),
        creds,
        registry.clone(),
    ));

    let image_source: Arc<dyn ImageSource> = build_image_source(&cfg, http.clone())?.into();
    image_source
        .validate()
        .await
        .context("image source validation")?;

    let identity = api.get_me().await.context("fetch bot identity")?;
    info!("authenticated as @{} (id {})", identity.username, identity.id);

    let pipeline = Arc::new(ReplyPipeline::new(
        &cfg,
        api.clone(),
        ledger.clone(),
        counters.clone(),
        image_source,
    ));
    let reposter = Arc::new(Reposter::new(api.clone(), cfg.rt_like_threshold));

    let scheduler = Scheduler::new(
        cfg,
        api,
        pipeline,
        ledger,
        counters,
        cache,
        registry,
        reposter,
        shutdown_rx,
    );

    let mut worker = tokio::spawn(scheduler.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("scheduler error during shutdown: {e:#}"),
                Err(e) => error!("scheduler task failed: {e}"),
            }
        }
        res = &mut worker => {
            match res {
                Ok(Ok(())) => info!("scheduler exited"),
                Ok(Err(e)) => {
                    error!("scheduler error: {e:#}");
                    return Err(e);
                }
                Err(e) => error!("scheduler task failed: {e}"),
            }
        }
    }

    Ok(())
}
