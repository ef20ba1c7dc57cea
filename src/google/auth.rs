//! OAuth refresh-token flow with a cached access token.

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::GoogleConfig;
use crate::error::MailboxError;

/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    token: SecretString,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Exchanges the long-lived refresh token for short-lived access tokens.
pub struct GoogleAuth {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    cached: Mutex<Option<CachedToken>>,
}

impl GoogleAuth {
    pub fn new(http: reqwest::Client, config: &GoogleConfig) -> Self {
        Self {
            http,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
            cached: Mutex::new(None),
        }
    }

    /// A valid access token, refreshing if the cached one is missing or stale.
    pub async fn access_token(&self) -> Result<SecretString, MailboxError> {
        let mut cached = self.cached.lock().await;
        if let Some(c) = cached.as_ref()
            && Instant::now() + EXPIRY_MARGIN < c.expires_at
        {
            return Ok(c.token.clone());
        }

        let fresh = self.refresh().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    /// Drop the cached token so the next call refreshes.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn refresh(&self) -> Result<CachedToken, MailboxError> {
        debug!("Refreshing Google access token");
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("refresh_token", self.refresh_token.expose_secret()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| MailboxError::Network {
                op: "oauth_refresh".into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(MailboxError::Http {
                op: "oauth_refresh".into(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailboxError::Auth(format!(
                "token refresh rejected ({status}): {body}"
            )));
        }

        let parsed: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| MailboxError::InvalidResponse {
                    op: "oauth_refresh".into(),
                    reason: e.to_string(),
                })?;

        info!(expires_in = parsed.expires_in, "Google access token refreshed");
        Ok(CachedToken {
            token: SecretString::from(parsed.access_token),
            expires_at: Instant::now() + Duration::from_secs(parsed.expires_in),
        })
    }
}
