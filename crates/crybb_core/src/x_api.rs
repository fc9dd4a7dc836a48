/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::anyhow;
use http::Method;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::http_retry::send_with_retry;
use crate::ledger::id_cmp;
use crate::oauth1::OAuth1Creds;
use crate::ratelimit::{now_unix, RateLimitRegistry};

const API_BASE: &str = "https://api.twitter.com/2";
const UPLOAD_URL: &str = "https://upload.twitter.com/1.1/media/upload.json";
const RETWEET_BASE: &str = "https://api.twitter.com/1.1/statuses/retweet";

const IDENTITY_TTL: Duration = Duration::from_secs(3600);
const TRANSPORT_RETRIES: u32 = 3;

/// Typed outcome of one API call. Transport failures are retried inside
/// `send_with_retry` before surfacing here.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limited on {endpoint} (reset {reset_unix})")]
    RateLimited { endpoint: &'static str, reset_unix: u64 },
    #[error("client error {status} on {endpoint}: {body}")]
    Client {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[error("transport failure on {endpoint}: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("unexpected response from {endpoint}: {detail}")]
    Decode {
        endpoint: &'static str,
        detail: String,
    },
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

/// One `@username` occurrence inside a post's text, in textual order.
#[derive(Debug, Clone, Deserialize)]
pub struct MentionEntity {
    pub username: String,
    pub start: u32,
    pub end: u32,
}

/// Immutable record of one incoming mention.
#[derive(Debug, Clone)]
pub struct Mention {
    pub id: String,
    pub author_id: String,
    pub created_at: Option<String>,
    pub text: String,
    pub mentions: Vec<MentionEntity>,
}

/// Result of one mentions-endpoint call: the posts (ascending by id) plus
/// the expansion users keyed both by lowercased handle and by id.
#[derive(Debug, Default)]
pub struct MentionBatch {
    pub mentions: Vec<Mention>,
    pub users_by_handle: HashMap<String, UserInfo>,
    pub handle_by_id: HashMap<String, String>,
}

/// A post on the bot's own timeline, for the quiet-period repost pass.
#[derive(Debug, Clone)]
pub struct OwnPost {
    pub id: String,
    pub like_count: u64,
}

pub struct XApi {
    http: reqwest::Client,
    bearer_token: String,
    creds: OAuth1Creds,
    registry: Arc<RateLimitRegistry>,
    identity: Mutex<Option<(BotIdentity, Instant)>>,
}

impl XApi {
    pub fn new(
        http: reqwest::Client,
        bearer_token: String,
        creds: OAuth1Creds,
        registry: Arc<RateLimitRegistry>,
    ) -> Self {
        Self {
            http,
            bearer_token,
            creds,
            registry,
            identity: Mutex::new(None),
        }
    }

    /// Bot identity, cached for an hour. A refetch failure falls back to
    /// the stale cached identity when one exists.
    pub async fn get_me(&self) -> ApiResult<BotIdentity> {
        if let Some((cached, at)) = self.identity.lock().unwrap().clone() {
            if at.elapsed() < IDENTITY_TTL {
                return Ok(cached);
            }
        }

        let url = format!("{API_BASE}/users/me");
        let res = self
            .call("users/me", &mut || {
                self.http
                    .get(&url)
                    .query(&[("user.fields", "id,username,name")])
                    .bearer_auth(&self.bearer_token)
            })
            .await;

        let resp = match res {
            Ok(v) => v,
            Err(e) => {
                if let Some((stale, _)) = self.identity.lock().unwrap().clone() {
                    warn!("identity refresh failed, keeping cached: {e:#}");
                    return Ok(stale);
                }
                return Err(e);
            }
        };

        #[derive(Deserialize)]
        struct Me {
            data: UserInfo,
        }
        let me: Me = decode_json("users/me", resp).await?;
        let identity = BotIdentity {
            id: me.data.id,
            username: me.data.username,
        };
        info!("bot identity: @{} (id {})", identity.username, identity.id);
        *self.identity.lock().unwrap() = Some((identity.clone(), Instant::now()));
        Ok(identity)
    }

    /// User lookup by handle. `Ok(None)` when the account does not exist
    /// or is suspended.
    pub async fn get_user_by_username(&self, username: &str) -> ApiResult<Option<UserInfo>> {
        let url = format!("{API_BASE}/users/by/username/{username}");
        let res = self
            .call("users/by/username", &mut || {
                self.http
                    .get(&url)
                    .query(&[("user.fields", "id,username,name,profile_image_url")])
                    .bearer_auth(&self.bearer_token)
            })
            .await;

        let resp = match res {
            Ok(v) => v,
            Err(ApiError::Client { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        #[derive(Deserialize)]
        struct Lookup {
            data: Option<UserInfo>,
        }
        // A suspended or deactivated account comes back 200 with an
        // errors block and no data.
        let lookup: Lookup = decode_json("users/by/username", resp).await?;
        Ok(lookup.data)
    }

    /// One mentions batch with full user expansions.
    pub async fn get_mentions(
        &self,
        bot_id: &str,
        since_id: Option<&str>,
    ) -> ApiResult<MentionBatch> {
        let url = format!("{API_BASE}/users/{bot_id}/mentions");
        let mut query: Vec<(&str, String)> = vec![
            ("max_results", "10".to_string()),
            (
                "expansions",
                "author_id,entities.mentions.username".to_string(),
            ),
            (
                "user.fields",
                "id,username,name,profile_image_url".to_string(),
            ),
            ("tweet.fields", "created_at,entities,author_id".to_string()),
        ];
        if let Some(since) = since_id {
            query.push(("since_id", since.to_string()));
        }

        let resp = self
            .call("users/mentions", &mut || {
                self.http
                    .get(&url)
                    .query(&query)
                    .bearer_auth(&self.bearer_token)
            })
            .await?;

        let raw: MentionsResponse = decode_json("users/mentions", resp).await?;
        let batch = build_batch(raw);
        debug!("fetched {} mentions", batch.mentions.len());
        Ok(batch)
    }

    /// The bot's own recent posts with like counts.
    pub async fn get_own_timeline(&self, bot_id: &str) -> ApiResult<Vec<OwnPost>> {
        let url = format!("{API_BASE}/users/{bot_id}/tweets");
        let resp = self
            .call("users/tweets", &mut || {
                self.http
                    .get(&url)
                    .query(&[
                        ("max_results", "10"),
                        ("tweet.fields", "public_metrics"),
                    ])
                    .bearer_auth(&self.bearer_token)
            })
            .await?;

        let raw: TimelineResponse = decode_json("users/tweets", resp).await?;
        let posts = raw
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|t| OwnPost {
                id: t.id,
                like_count: t.public_metrics.map(|m| m.like_count).unwrap_or(0),
            })
            .collect();
        Ok(posts)
    }

    /// v1.1 multipart media upload; returns the media id for attachment.
    pub async fn media_upload(&self, image_bytes: Vec<u8>, filename: &str) -> ApiResult<String> {
        let mime = mime_guess::from_path(filename)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());
        info!("uploading media: {} bytes", image_bytes.len());

        let filename = filename.to_string();
        let resp = self
            .call("media/upload", &mut || {
                let part = reqwest::multipart::Part::bytes(image_bytes.clone())
                    .file_name(filename.clone())
                    .mime_str(&mime)
                    .expect("static mime string");
                let form = reqwest::multipart::Form::new().part("media", part);
                let auth = self
                    .creds
                    .authorization_header(&Method::POST, UPLOAD_URL, &[]);
                self.http
                    .post(UPLOAD_URL)
                    .header("Authorization", auth)
                    .multipart(form)
            })
            .await?;

        #[derive(Deserialize)]
        struct Uploaded {
            media_id_string: Option<String>,
        }
        let uploaded: Uploaded = decode_json("media/upload", resp).await?;
        uploaded.media_id_string.ok_or(ApiError::Decode {
            endpoint: "media/upload",
            detail: "missing media_id_string".to_string(),
        })
    }

    /// Post a threaded reply, optionally with attached media.
    pub async fn create_reply(
        &self,
        text: &str,
        in_reply_to: &str,
        media_ids: &[String],
    ) -> ApiResult<String> {
        let url = format!("{API_BASE}/tweets");
        let mut body = serde_json::json!({
            "text": text,
            "reply": { "in_reply_to_tweet_id": in_reply_to },
        });
        if !media_ids.is_empty() {
            body["media"] = serde_json::json!({ "media_ids": media_ids });
        }

        let resp = self
            .call("tweets", &mut || {
                let auth = self.creds.authorization_header(&Method::POST, &url, &[]);
                self.http
                    .post(&url)
                    .header("Authorization", auth)
                    .json(&body)
            })
            .await?;

        #[derive(Deserialize)]
        struct Created {
            data: CreatedData,
        }
        #[derive(Deserialize)]
        struct CreatedData {
            id: String,
        }
        let created: Created = decode_json("tweets", resp).await?;
        info!("reply posted: {}", created.data.id);
        Ok(created.data.id)
    }

    /// v1.1 repost of one of the bot's own posts.
    pub async fn repost(&self, post_id: &str) -> ApiResult<()> {
        let url = format!("{RETWEET_BASE}/{post_id}.json");
        self.call("statuses/retweet", &mut || {
            let auth = self.creds.authorization_header(&Method::POST, &url, &[]);
            self.http.post(&url).header("Authorization", auth)
        })
        .await?;
        Ok(())
    }

    /// Shared per-call path: quota gate, transport retry, registry update,
    /// typed status mapping. 429 waits out the reset window before
    /// returning the typed outcome so one caller retry suffices.
    async fn call<F>(&self, endpoint: &'static str, build: &mut F) -> ApiResult<reqwest::Response>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        self.registry.maybe_sleep(endpoint).await;

        let resp = send_with_retry(build, TRANSPORT_RETRIES)
            .await
            .map_err(|source| ApiError::Transport { endpoint, source })?;

        self.registry.observe(endpoint, resp.headers());
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let reset_unix = resp
                .headers()
                .get("x-rate-limit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or_else(|| now_unix() + 60);
            warn!("429 on {endpoint}, sleeping until reset {reset_unix}");
            self.registry.sleep_until_reset(reset_unix).await;
            return Err(ApiError::RateLimited { endpoint, reset_unix });
        }
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Client {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            return Err(ApiError::Transport {
                endpoint,
                source: anyhow!("server error {status} after retries"),
            });
        }
        Ok(resp)
    }
}

async fn decode_json<T: serde::de::DeserializeOwned>(
    endpoint: &'static str,
    resp: reqwest::Response,
) -> ApiResult<T> {
    resp.json::<T>().await.map_err(|e| ApiError::Decode {
        endpoint,
        detail: e.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct MentionsResponse {
    data: Option<Vec<TweetObject>>,
    includes: Option<Includes>,
}

#[derive(Debug, Deserialize)]
struct TweetObject {
    id: String,
    text: String,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    entities: Option<TweetEntities>,
}

#[derive(Debug, Deserialize)]
struct TweetEntities {
    #[serde(default)]
    mentions: Option<Vec<MentionEntity>>,
}

#[derive(Debug, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Option<Vec<UserInfo>>,
}

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    data: Option<Vec<TimelineTweet>>,
}

#[derive(Debug, Deserialize)]
struct TimelineTweet {
    id: String,
    #[serde(default)]
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    like_count: u64,
}

fn build_batch(raw: MentionsResponse) -> MentionBatch {
    let mut batch = MentionBatch::default();

    if let Some(users) = raw.includes.and_then(|i| i.users) {
        for user in users {
            let key = user.username.to_ascii_lowercase();
            batch.handle_by_id.insert(user.id.clone(), key.clone());
            batch.users_by_handle.insert(key, user);
        }
    }

    let mut mentions: Vec<Mention> = raw
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|t| {
            let mut entities = t
                .entities
                .and_then(|e| e.mentions)
                .unwrap_or_default();
            entities.sort_by_key(|m| m.start);
            Mention {
                id: t.id,
                author_id: t.author_id.unwrap_or_default(),
                created_at: t.created_at,
                text: t.text,
                mentions: entities,
            }
        })
        .collect();
    // The endpoint returns newest first; processing order is ascending.
    mentions.sort_by(|a, b| id_cmp(&a.id, &b.id));
    batch.mentions = mentions;
    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_sorts_ascending_and_indexes_expansions() {
        let raw: MentionsResponse = serde_json::from_value(serde_json::json!({
            "data": [
                {
                    "id": "102",
                    "text": "@crybbmaker hi",
                    "author_id": "9",
                    "created_at": "2026-07-30T12:01:00.000Z",
                    "entities": { "mentions": [
                        {"username": "crybbmaker", "start": 0, "end": 11}
                    ]}
                },
                {
                    "id": "100",
                    "text": "@crybbmaker @alice make me crybb",
                    "author_id": "9",
                    "created_at": "2026-07-30T12:00:00.000Z",
                    "entities": { "mentions": [
                        {"username": "crybbmaker", "start": 0, "end": 11},
                        {"username": "alice", "start": 12, "end": 18}
                    ]}
                }
            ],
            "includes": { "users": [
                {"id": "9", "username": "Eve", "name": "Eve"},
                {"id": "7", "username": "Alice", "name": "Alice",
                 "profile_image_url": "https://img.invalid/a_normal.jpg"}
            ]}
        }))
        .unwrap();

        let batch = build_batch(raw);
        assert_eq!(batch.mentions[0].id, "100");
        assert_eq!(batch.mentions[1].id, "102");
        assert_eq!(batch.mentions[0].mentions.len(), 2);
        assert_eq!(batch.handle_by_id.get("9").unwrap(), "eve");
        assert_eq!(batch.users_by_handle.get("alice").unwrap().id, "7");
    }

    #[test]
    fn batch_orders_entities_by_start_offset() {
        let raw: MentionsResponse = serde_json::from_value(serde_json::json!({
            "data": [{
                "id": "50",
                "text": "@b @a",
                "author_id": "1",
                "entities": { "mentions": [
                    {"username": "a", "start": 3, "end": 5},
                    {"username": "b", "start": 0, "end": 2}
                ]}
            }]
        }))
        .unwrap();

        let batch = build_batch(raw);
        let ents = &batch.mentions[0].mentions;
        assert_eq!(ents[0].username, "b");
        assert_eq!(ents[1].username, "a");
    }

    #[test]
    fn empty_payload_builds_empty_batch() {
        let raw: MentionsResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        let batch = build_batch(raw);
        assert!(batch.mentions.is_empty());
        assert!(batch.users_by_handle.is_empty());
    }
}
