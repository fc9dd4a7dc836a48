/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use rand::{thread_rng, Rng};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Send a request, retrying transport failures and 5xx responses up to
/// `retries` extra attempts with exponential backoff (500ms doubling,
/// +/-20% jitter). 429 is never retried here: the API layer turns it into
/// a typed outcome after waiting out the reset window.
pub async fn send_with_retry<F>(build: &mut F, retries: u32) -> Result<Response>
where
    F: FnMut() -> RequestBuilder,
{
    let max_attempts = retries.saturating_add(1).clamp(1, 5);
    let mut backoff = Duration::from_millis(500);
    for attempt in 0..max_attempts {
        match build().send().await {
            Ok(resp) => {
                let status = resp.status();
                if should_retry_status(status) && attempt + 1 < max_attempts {
                    sleep_with_jitter(backoff).await;
                    backoff = backoff.saturating_mul(2).min(Duration::from_secs(8));
                    continue;
                }
                return Ok(resp);
            }
            Err(e) => {
                if attempt + 1 >= max_attempts {
                    return Err(e.into());
                }
                sleep_with_jitter(backoff).await;
                backoff = backoff.saturating_mul(2).min(Duration::from_secs(8));
            }
        }
    }
    unreachable!("retry loop should return or error");
}

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
}

async fn sleep_with_jitter(base: Duration) {
    let base_ms = base.as_millis() as u64;
    let spread = (base_ms / 5).max(1);
    let jitter_ms: i64 = thread_rng().gen_range(-(spread as i64)..=spread as i64);
    let ms = base_ms.saturating_add_signed(jitter_ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(should_retry_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(should_retry_status(StatusCode::BAD_GATEWAY));
        assert!(!should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!should_retry_status(StatusCode::NOT_FOUND));
        assert!(!should_retry_status(StatusCode::OK));
    }
}
