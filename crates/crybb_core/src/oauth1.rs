/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use hmac::{Hmac, Mac};
use http::Method;
use rand::{rngs::OsRng, RngCore};
use sha1::Sha1;
use urlencoding::encode;

/// OAuth 1.0a user-context credential for the write endpoints.
#[derive(Clone)]
pub struct OAuth1Creds {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

impl OAuth1Creds {
    /// Build the `Authorization` header for one request. `extra_params`
    /// carries form/query parameters that take part in the signature
    /// (empty for JSON and multipart bodies).
    pub fn authorization_header(
        &self,
        method: &Method,
        url: &str,
        extra_params: &[(&str, &str)],
    ) -> String {
        self.authorization_header_at(method, url, extra_params, now_unix(), &new_nonce())
    }

    fn authorization_header_at(
        &self,
        method: &Method,
        url: &str,
        extra_params: &[(&str, &str)],
        timestamp: u64,
        nonce: &str,
    ) -> String {
        let timestamp = timestamp.to_string();
        let oauth_params: Vec<(&str, &str)> = vec![
            ("oauth_consumer_key", self.consumer_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp.as_str()),
            ("oauth_token", self.access_token.as_str()),
            ("oauth_version", "1.0"),
        ];

        let (base_url, query_params) = split_query(url);

        let mut all: Vec<(String, String)> = Vec::new();
        for (k, v) in oauth_params.iter().chain(extra_params.iter()) {
            all.push((encode(k).into_owned(), encode(v).into_owned()));
        }
        for (k, v) in &query_params {
            all.push((encode(k).into_owned(), encode(v).into_owned()));
        }
        all.sort();

        let param_string = all
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let base_string = format!(
            "{}&{}&{}",
            method.as_str(),
            encode(base_url),
            encode(&param_string)
        );
        let signing_key = format!(
            "{}&{}",
            encode(&self.consumer_secret),
            encode(&self.access_secret)
        );

        let mut mac = Hmac::<Sha1>::new_from_slice(signing_key.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(base_string.as_bytes());
        let signature = B64.encode(mac.finalize().into_bytes());

        let mut header_params: Vec<(&str, String)> = oauth_params
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect();
        header_params.push(("oauth_signature", signature));
        header_params.sort();

        let joined = header_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("OAuth {joined}")
    }
}

fn split_query(url: &str) -> (&str, Vec<(String, String)>) {
    let Some((base, query)) = url.split_once('?') else {
        return (url, Vec::new());
    };
    let params = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (decode_component(k), decode_component(v)),
            None => (decode_component(p), String::new()),
        })
        .collect();
    (base, params)
}

fn decode_component(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

fn new_nonce() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    b.iter().map(|v| format!("{v:02x}")).collect()
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
