//! HTTP surface: Pub/Sub push webhook, watch renewal and health.
//!
//! The push endpoint always answers 200 once the caller is authorised.
//! A non-2xx answer makes Pub/Sub redeliver, which would only repeat a
//! permanent failure; transient ones are recovered through the label and
//! cursor on the next notification.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::mailbox::WatchRenewal;
use crate::pipeline::{NotificationHandler, Terminal};
use crate::pubsub::PushRequest;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<NotificationHandler>,
    pub watch: Option<Arc<dyn WatchRenewal>>,
    pub token: Option<SecretString>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

impl AppState {
    fn authorised(&self, query: &TokenQuery) -> bool {
        match &self.token {
            None => true,
            Some(expected) => query
                .token
                .as_deref()
                .is_some_and(|given| token_matches(given, expected.expose_secret())),
        }
    }
}

/// Constant-time for equal lengths; `ct_eq` on slices of different length is false.
fn token_matches(given: &str, expected: &str) -> bool {
    bool::from(given.as_bytes().ct_eq(expected.as_bytes()))
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"error": "invalid or missing token"})),
    )
        .into_response()
}

/// POST /webhook/gmail
async fn gmail_push(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    body: Bytes,
) -> Response {
    if !state.authorised(&query) {
        warn!("Rejected push with bad token");
        return forbidden();
    }

    let notification = match serde_json::from_slice::<PushRequest>(&body)
        .map_err(|e| e.to_string())
        .and_then(|push| push.message.decode().map_err(|e| e.to_string()))
    {
        Ok(n) => n,
        Err(reason) => {
            warn!(error = %reason, "Undecodable push payload, acknowledging");
            return Json(json!({"status": "error", "error": reason})).into_response();
        }
    };

    info!(history_id = notification.history_id, "Push notification received");

    let body = match state.handler.handle(notification.cursor()).await {
        Ok(report) if report.baseline => json!({
            "status": "initialized",
            "run_id": report.run_id,
            "history_id": notification.history_id,
        }),
        Ok(report) => json!({
            "status": "ok",
            "run_id": report.run_id,
            "processed": report.outcomes.len(),
            "sent": report.count(Terminal::Sent),
            "pending": report.count(Terminal::Pending),
            "skipped": report.count(Terminal::Skip),
            "errors": report.count(Terminal::Error),
            "cursor_error": report.cursor_error.as_deref(),
        }),
        Err(PipelineError::History(e)) => {
            error!(error = %e, "History query failed, cursor kept");
            json!({"status": "history_error", "error": e.to_string()})
        }
        Err(e) => {
            error!(error = %e, "Notification failed");
            json!({"status": "error", "error": e.to_string()})
        }
    };
    Json(body).into_response()
}

/// POST /renew-watch
async fn renew_watch(State(state): State<AppState>, Query(query): Query<TokenQuery>) -> Response {
    if !state.authorised(&query) {
        return forbidden();
    }
    let Some(watch) = &state.watch else {
        return (
            StatusCode::NOT_IMPLEMENTED,
            Json(json!({"error": "watch renewal not configured"})),
        )
            .into_response();
    };
    match watch.renew_watch().await {
        Ok(status) => {
            info!(cursor = %status.cursor, "Watch renewed");
            Json(json!({
                "status": "ok",
                "history_id": status.cursor,
                "expiration": status.expiration_ms,
            }))
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Watch renewal failed");
            (StatusCode::BAD_GATEWAY, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({"status": "healthy"}))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/gmail", post(gmail_push))
        .route("/renew-watch", post(renew_watch))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
