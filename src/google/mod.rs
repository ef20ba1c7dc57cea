//! Authenticated JSON client shared by the Gmail, Calendar and People adapters.

pub mod auth;

use std::sync::Arc;

use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::GoogleConfig;
use crate::error::MailboxError;

pub use auth::GoogleAuth;

/// Bearer-authenticated HTTP client for Google REST APIs.
#[derive(Clone)]
pub struct GoogleClient {
    http: reqwest::Client,
    auth: Arc<GoogleAuth>,
}

impl GoogleClient {
    pub fn new(config: &GoogleConfig) -> Result<Self, MailboxError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MailboxError::Network {
                op: "http_client".into(),
                reason: e.to_string(),
            })?;
        let auth = Arc::new(GoogleAuth::new(http.clone(), config));
        Ok(Self { http, auth })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        op: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, MailboxError> {
        let response = self
            .send(op, |http| http.request(Method::GET, url).query(query))
            .await?;
        decode(op, response).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        op: &str,
        url: &str,
        body: &B,
    ) -> Result<T, MailboxError> {
        let response = self
            .send(op, |http| http.request(Method::POST, url).json(body))
            .await?;
        decode(op, response).await
    }

    /// Send with a bearer token. A 401 invalidates the cached token and
    /// retries once with a fresh one.
    async fn send(
        &self,
        op: &str,
        build: impl Fn(&reqwest::Client) -> RequestBuilder,
    ) -> Result<reqwest::Response, MailboxError> {
        let mut refreshed = false;
        loop {
            let token = self.auth.access_token().await?;
            let response = build(&self.http)
                .bearer_auth(token.expose_secret())
                .send()
                .await
                .map_err(|e| MailboxError::Network {
                    op: op.to_string(),
                    reason: e.to_string(),
                })?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !refreshed {
                debug!(op, "Access token rejected, refreshing");
                self.auth.invalidate().await;
                refreshed = true;
                continue;
            }
            if status == StatusCode::NOT_FOUND {
                return Err(MailboxError::NotFound {
                    what: op.to_string(),
                });
            }
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                let body = response.text().await.unwrap_or_default();
                return Err(MailboxError::Auth(format!("{op}: {status} {body}")));
            }
            if !status.is_success() {
                return Err(MailboxError::Http {
                    op: op.to_string(),
                    status: status.as_u16(),
                    body: response.text().await.unwrap_or_default(),
                });
            }
            return Ok(response);
        }
    }
}

async fn decode<T: DeserializeOwned>(op: &str, response: reqwest::Response) -> Result<T, MailboxError> {
    let bytes = response.bytes().await.map_err(|e| MailboxError::Network {
        op: op.to_string(),
        reason: e.to_string(),
    })?;
    // Some endpoints (modify, stop) answer with an empty body.
    let bytes: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
    serde_json::from_slice(bytes).map_err(|e| MailboxError::InvalidResponse {
        op: op.to_string(),
        reason: e.to_string(),
    })
}

/// Deserialize a Google int64 field, which the JSON APIs encode as a string.
pub(crate) mod string_u64 {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Num(n) => Ok(n),
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
            match Option::<Raw>::deserialize(d)? {
                None => Ok(None),
                Some(Raw::Num(n)) => Ok(Some(n)),
                Some(Raw::Str(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
            }
        }
    }
}
