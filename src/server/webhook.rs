//! Webhook endpoint handlers.
//!
//! - `GET /webhook/twitter?crc_token=...` answers the platform's CRC
//!   challenge.
//! - `POST /webhook/twitter` takes an Account Activity batch, publishes it to
//!   observers and classifies each event. The qualifying ones are handed to
//!   [`dispatch_batch`] and the request is answered straight away.
//!
//! A redelivered event is recognised by its key and not run again; see
//! [`crate::dedupe`].

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use super::dispatch::{QueuedEvent, dispatch_batch};
use super::signature::{crc_response_token, verify_signature};
use crate::classify::{classify, split_batch};
use crate::fanout::{ACTIVITY_TOPIC, ActivityEvent};

/// Header carrying the body signature.
const HEADER_SIGNATURE: &str = "x-twitter-webhooks-signature";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Error: crc_token missing from request.")]
    MissingCrcToken,

    /// CRC challenges cannot be answered without the consumer secret.
    #[error("consumer secret not configured")]
    SecretNotConfigured,

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingCrcToken => StatusCode::BAD_REQUEST,
            WebhookError::SecretNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            WebhookError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::InvalidJson(_) => StatusCode::BAD_REQUEST,
        };

        (status, self.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CrcQuery {
    pub crc_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrcResponse {
    pub response_token: String,
}

/// CRC challenge handler.
///
/// ```ignore
/// GET /webhook/twitter?crc_token=abc HTTP/1.1
///
/// HTTP/1.1 200 OK
/// {"response_token": "sha256=..."}
/// ```
pub async fn crc_handler(
    State(app_state): State<AppState>,
    Query(query): Query<CrcQuery>,
) -> Result<Json<CrcResponse>, WebhookError> {
    let crc_token = query
        .crc_token
        .filter(|t| !t.is_empty())
        .ok_or(WebhookError::MissingCrcToken)?;
    let secret = app_state
        .consumer_secret()
        .ok_or(WebhookError::SecretNotConfigured)?;

    debug!("Answering CRC challenge");
    Ok(Json(CrcResponse {
        response_token: crc_response_token(&crc_token, secret),
    }))
}

/// Account Activity handler.
///
/// # Response
///
/// - 200 OK: batch accepted; events are processed in the background
/// - 400 Bad Request: missing signature header or invalid JSON
/// - 401 Unauthorized: invalid signature
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    if let Some(secret) = app_state.consumer_secret() {
        let signature = get_header(&headers, HEADER_SIGNATURE)?;
        if !verify_signature(&body, &signature, secret) {
            warn!("Invalid webhook signature");
            return Err(WebhookError::InvalidSignature);
        }
    }

    let body_json: serde_json::Value = serde_json::from_slice(&body)?;
    let raw_events = split_batch(&body_json, &app_state.classifier().bot_id);

    let activity = ActivityEvent::new(body_json);
    let internal_id = activity.internal_id;
    app_state.fanout().publish(ACTIVITY_TOPIC, activity);

    let mut queued = Vec::new();
    for raw in &raw_events {
        let event = classify(app_state.classifier(), raw);
        if !event.qualifies() {
            debug!(%internal_id, reason = ?event.rejection, "Ignoring event");
            continue;
        }
        queued.push(QueuedEvent {
            key: raw.event_key(),
            event,
        });
    }

    info!(
        %internal_id,
        events = raw_events.len(),
        qualifying = queued.len(),
        "Webhook accepted"
    );
    if !queued.is_empty() {
        dispatch_batch(&app_state, internal_id, queued);
    }
    Ok((StatusCode::OK, "200 OK"))
}

fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(WebhookError::MissingHeader(name))
}
