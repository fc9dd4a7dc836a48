/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

use crate::limiter::normalize_handle;

/// Which image pipeline feeds the reply: the external AI transform or the
/// local placeholder source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePipeline {
    Ai,
    Placeholder,
}

impl ImagePipeline {
    pub fn from_str_opt(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "ai" => Some(Self::Ai),
            "placeholder" => Some(Self::Placeholder),
            _ => None,
        }
    }
}

/// Flat run configuration, loaded once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct BotConfig {
    // App credential (bearer reads).
    pub client_id: String,
    pub client_secret: String,
    pub bearer_token: String,

    // User-context credential (signed writes).
    pub api_key: String,
    pub api_secret: String,
    pub access_token: String,
    pub access_secret: String,

    pub bot_handle: String,

    pub poll_seconds: u64,
    pub awake_min_secs: u64,
    pub awake_max_secs: u64,
    pub sleeper_min_secs: u64,
    pub sleeper_max_secs: u64,

    pub per_author_hourly_limit: usize,
    pub per_target_hourly_limit: usize,
    pub whitelist_handles: HashSet<String>,

    pub ai_max_concurrency: usize,
    pub ai_max_attempts: u32,
    pub ai_timeout_secs: u64,
    pub ai_poll_interval_secs: f64,
    pub transform_api_token: String,
    pub transform_model: String,
    pub style_url: Option<String>,
    pub image_pipeline: ImagePipeline,

    pub rt_like_threshold: u32,

    pub http_timeout_secs: u64,
    pub outbox_dir: PathBuf,
}

impl BotConfig {
    /// Read the whole configuration from the environment. Missing required
    /// credentials are reported together rather than one at a time.
    pub fn from_env() -> Result<Self> {
        let image_pipeline = ImagePipeline::from_str_opt(&env_or("IMAGE_PIPELINE", "ai"))
            .context("IMAGE_PIPELINE must be one of: ai, placeholder")?;

        let cfg = Self {
            client_id: env_or("CLIENT_ID", ""),
            client_secret: env_or("CLIENT_SECRET", ""),
            bearer_token: env_or("BEARER_TOKEN", ""),
            api_key: env_or("API_KEY", ""),
            api_secret: env_or("API_SECRET", ""),
            access_token: env_or("ACCESS_TOKEN", ""),
            access_secret: env_or("ACCESS_SECRET", ""),
            bot_handle: normalize_handle(&env_or("BOT_HANDLE", "crybbmaker")),
            poll_seconds: env_parse("POLL_SECONDS", 30)?,
            awake_min_secs: env_parse("AWAKE_MIN_SECS", 180)?,
            awake_max_secs: env_parse("AWAKE_MAX_SECS", 300)?,
            sleeper_min_secs: env_parse("SLEEPER_MIN_SECS", 480)?,
            sleeper_max_secs: env_parse("SLEEPER_MAX_SECS", 600)?,
            per_author_hourly_limit: env_parse("PER_AUTHOR_HOURLY_LIMIT", 12)?,
            per_target_hourly_limit: env_parse("PER_TARGET_HOURLY_LIMIT", 5)?,
            whitelist_handles: parse_whitelist(&env_or("WHITELIST_HANDLES", "")),
            ai_max_concurrency: env_parse("AI_MAX_CONCURRENCY", 2)?,
            ai_max_attempts: env_parse("AI_MAX_ATTEMPTS", 2)?,
            ai_timeout_secs: env_parse_aliased(&["AI_TIMEOUT_SECS", "REPLICATE_TIMEOUT_SECS"], 120)?,
            ai_poll_interval_secs: env_parse_aliased(
                &["AI_POLL_INTERVAL_SECS", "REPLICATE_POLL_INTERVAL_SECS"],
                2.0,
            )?,
            transform_api_token: env_or("REPLICATE_API_TOKEN", ""),
            transform_model: env_or("REPLICATE_MODEL", "google/nano-banana"),
            style_url: std::env::var("CRYBB_STYLE_URL")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            image_pipeline,
            rt_like_threshold: env_parse("RT_LIKE_THRESHOLD", 10)?,
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", 30)?,
            outbox_dir: outbox_dir_from_env()?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("CLIENT_ID", &self.client_id),
            ("CLIENT_SECRET", &self.client_secret),
            ("BEARER_TOKEN", &self.bearer_token),
            ("API_KEY", &self.api_key),
            ("API_SECRET", &self.api_secret),
            ("ACCESS_TOKEN", &self.access_token),
            ("ACCESS_SECRET", &self.access_secret),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, v)| v.is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("missing required environment variables: {}", missing.join(", "));
        }

        if self.image_pipeline == ImagePipeline::Ai {
            let mut ai_missing = Vec::new();
            if self.transform_api_token.is_empty() {
                ai_missing.push("REPLICATE_API_TOKEN");
            }
            if self.style_url.is_none() {
                ai_missing.push("CRYBB_STYLE_URL");
            }
            if !ai_missing.is_empty() {
                anyhow::bail!("IMAGE_PIPELINE=ai requires: {}", ai_missing.join(", "));
            }
        }

        if self.bot_handle.is_empty() {
            anyhow::bail!("BOT_HANDLE must not be empty");
        }
        if self.awake_min_secs > self.awake_max_secs {
            anyhow::bail!("AWAKE_MIN_SECS must not exceed AWAKE_MAX_SECS");
        }
        if self.sleeper_min_secs > self.sleeper_max_secs {
            anyhow::bail!("SLEEPER_MIN_SECS must not exceed SLEEPER_MAX_SECS");
        }
        if self.ai_max_concurrency == 0 {
            anyhow::bail!("AI_MAX_CONCURRENCY must be at least 1");
        }
        if self.ai_max_attempts == 0 {
            anyhow::bail!("AI_MAX_ATTEMPTS must be at least 1");
        }
        Ok(())
    }
}

/// `OUTBOX_DIR` when set, otherwise the platform-local state dir.
fn outbox_dir_from_env() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("OUTBOX_DIR") {
        if !v.trim().is_empty() {
            return Ok(PathBuf::from(v));
        }
    }
    let proj = ProjectDirs::from("net", "crybb", "Crybb")
        .context("unable to determine platform data dir")?;
    Ok(proj.data_local_dir().join("outbox"))
}

fn parse_whitelist(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(normalize_handle)
        .filter(|h| !h.is_empty())
        .collect()
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {name}: {e}")),
        _ => Ok(default),
    }
}

fn env_parse_aliased<T>(names: &[&str], default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    for name in names {
        if let Ok(v) = std::env::var(name) {
            if !v.trim().is_empty() {
                return v
                    .trim()
                    .parse::<T>()
                    .map_err(|e| anyhow::anyhow!("invalid {name}: {e}"));
            }
        }
    }
    Ok(default)
}
