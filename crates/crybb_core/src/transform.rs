/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{BotConfig, ImagePipeline};
use crate::http_retry::send_with_retry;

const PREDICTIONS_URL: &str = "https://api.replicate.com/v1/predictions";

/// The fixed prompt sent alongside `[style, pfp]`.
const PROMPT: &str = "Redraw the person in the second image as a crying \
baby in the exact art style of the first image. Keep the face \
recognizable, match the first image's palette and linework, fill the \
whole frame.";

/// Where the reply image comes from: the external AI transform or the
/// plain profile picture.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// One-time startup check; a failure here is fatal.
    async fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Produce the reply image for one mention. `pfp_url` is already
    /// normalized to the 400x400 variant.
    async fn fetch_image(&self, pfp_url: &str, mention_text: &str) -> Result<Vec<u8>>;
}

/// AI transform backed by the prediction service: submit a job with the
/// style anchor and the target pfp, poll it, download the output.
pub struct AiImageSource {
    http: reqwest::Client,
    token: String,
    model: String,
    style_url: String,
    timeout: Duration,
    poll_interval: Duration,
    max_attempts: u32,
}

impl AiImageSource {
    pub fn new(http: reqwest::Client, cfg: &BotConfig) -> Result<Self> {
        let style_url = cfg
            .style_url
            .clone()
            .context("AI pipeline requires CRYBB_STYLE_URL")?;
        Ok(Self {
            http,
            token: cfg.transform_api_token.clone(),
            model: cfg.transform_model.clone(),
            style_url,
            timeout: Duration::from_secs(cfg.ai_timeout_secs),
            poll_interval: Duration::from_secs_f64(cfg.ai_poll_interval_secs.max(0.1)),
            max_attempts: cfg.ai_max_attempts.max(1),
        })
    }

    /// HEAD the style anchor once at startup; a bad URL is fatal.
    pub async fn validate_style_url(&self) -> Result<()> {
        let resp = self
            .http
            .head(&self.style_url)
            .send()
            .await
            .with_context(|| format!("HEAD style url: {}", self.style_url))?;
        if !resp.status().is_success() {
            bail!("style url not reachable: {} {}", self.style_url, resp.status());
        }
        Ok(())
    }

    async fn generate_once(&self, pfp_url: &str) -> Result<Vec<u8>> {
        let payload = serde_json::json!({
            "version": self.model,
            "input": {
                "prompt": PROMPT,
                "image_input": [self.style_url, pfp_url],
                "aspect_ratio": "match_input_image",
                "output_format": "jpg",
            },
        });

        let resp = send_with_retry(
            &mut || {
                self.http
                    .post(PREDICTIONS_URL)
                    .header("Authorization", format!("Token {}", self.token))
                    .json(&payload)
            },
            2,
        )
        .await
        .context("submit prediction")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("prediction submit failed: {status} {body}");
        }
        let created: Prediction = resp.json().await.context("decode prediction")?;
        let id = created.id.context("prediction id missing")?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if Instant::now() > deadline {
                bail!("prediction {id} timed out");
            }

            let url = format!("{PREDICTIONS_URL}/{id}");
            let resp = send_with_retry(
                &mut || {
                    self.http
                        .get(&url)
                        .header("Authorization", format!("Token {}", self.token))
                },
                2,
            )
            .await
            .context("poll prediction")?;
            if !resp.status().is_success() {
                let status = resp.status();
                bail!("prediction poll failed: {status}");
            }
            let state: Prediction = resp.json().await.context("decode prediction state")?;

            match state.status.as_deref() {
                Some("succeeded") => {
                    let output_url = state
                        .first_output_url()
                        .ok_or_else(|| anyhow!("prediction {id} returned no output"))?;
                    return self.download(&output_url).await;
                }
                Some("failed") | Some("canceled") => {
                    let detail = state.error.unwrap_or_else(|| "no detail".to_string());
                    bail!("prediction {id} failed: {detail}");
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = send_with_retry(&mut || self.http.get(url), 2)
            .await
            .with_context(|| format!("download output: {url}"))?;
        if !resp.status().is_success() {
            bail!("output download failed: {}", resp.status());
        }
        let bytes = resp.bytes().await.context("read output bytes")?;
        if bytes.is_empty() {
            bail!("output download was empty");
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageSource for AiImageSource {
    async fn validate(&self) -> Result<()> {
        self.validate_style_url().await
    }

    async fn fetch_image(&self, pfp_url: &str, _mention_text: &str) -> Result<Vec<u8>> {
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match self.generate_once(pfp_url).await {
                Ok(bytes) => {
                    info!("transform succeeded ({} bytes)", bytes.len());
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!("transform attempt {attempt}/{} failed: {e:#}", self.max_attempts);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("transform produced no attempts")))
    }
}

/// Placeholder mode: the reply image is the target's profile picture as
/// fetched; the actual placeholder rendering lives outside the engine.
pub struct PlaceholderImageSource {
    http: reqwest::Client,
}

impl PlaceholderImageSource {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ImageSource for PlaceholderImageSource {
    async fn fetch_image(&self, pfp_url: &str, _mention_text: &str) -> Result<Vec<u8>> {
        let resp = send_with_retry(&mut || self.http.get(pfp_url), 2)
            .await
            .with_context(|| format!("fetch pfp: {pfp_url}"))?;
        if !resp.status().is_success() {
            bail!("pfp fetch failed: {} {}", pfp_url, resp.status());
        }
        let bytes = resp.bytes().await.context("read pfp bytes")?;
        if bytes.is_empty() {
            bail!("pfp fetch was empty");
        }
        Ok(bytes.to_vec())
    }
}

pub fn build_image_source(
    cfg: &BotConfig,
    http: reqwest::Client,
) -> Result<Box<dyn ImageSource>> {
    match cfg.image_pipeline {
        ImagePipeline::Ai => Ok(Box::new(AiImageSource::new(http, cfg)?)),
        ImagePipeline::Placeholder => Ok(Box::new(PlaceholderImageSource::new(http))),
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl Prediction {
    /// `output` is either a list of URLs or a bare URL string.
    fn first_output_url(&self) -> Option<String> {
        match self.output.as_ref()? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Array(items) => items
                .iter()
                .find_map(|v| v.as_str())
                .map(|s| s.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_url_from_list_or_string() {
        let p: Prediction = serde_json::from_value(serde_json::json!({
            "id": "p1", "status": "succeeded",
            "output": ["https://out.invalid/a.jpg", "https://out.invalid/b.jpg"]
        }))
        .unwrap();
        assert_eq!(
            p.first_output_url().unwrap(),
            "https://out.invalid/a.jpg"
        );

        let p: Prediction = serde_json::from_value(serde_json::json!({
            "id": "p2", "status": "succeeded", "output": "https://out.invalid/c.jpg"
        }))
        .unwrap();
        assert_eq!(p.first_output_url().unwrap(), "https://out.invalid/c.jpg");

        let p: Prediction = serde_json::from_value(serde_json::json!({
            "id": "p3", "status": "succeeded", "output": []
        }))
        .unwrap();
        assert!(p.first_output_url().is_none());
    }
}
