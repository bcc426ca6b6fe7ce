//! HTTP client for the platform's v2 REST API.
//!
//! Authenticates with an OAuth 2.0 user access token (bearer). Obtaining and
//! refreshing that token happens outside this process.
//!
//! - DM: `POST /2/dm_conversations/with/{participant_id}/messages`
//! - Reply: `POST /2/tweets` with `reply.in_reply_to_tweet_id`

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::error::DeliveryError;
use super::retry::{RetryPolicy, with_retries};
use super::{Ack, DeliveryGateway, FallbackChannel};
use crate::types::{ReplyContext, UserId};

pub const DEFAULT_API_BASE: &str = "https://api.twitter.com";

/// Platform API client. Cheap to clone.
#[derive(Clone)]
pub struct TwitterClient {
    http: reqwest::Client,
    api_base: String,
    access_token: String,
    retry: RetryPolicy,
}

impl TwitterClient {
    /// Creates a client against `api_base` (no trailing slash needed).
    pub fn new(
        api_base: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("link-dispenser/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(DeliveryError::from_reqwest)?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            retry: RetryPolicy::DEFAULT,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sends a DM, retrying transient failures.
    #[instrument(skip_all, fields(recipient = %recipient))]
    pub async fn send_direct_message(
        &self,
        recipient: &UserId,
        text: &str,
    ) -> Result<Ack, DeliveryError> {
        let path = format!("/2/dm_conversations/with/{}/messages", recipient.as_str());
        let body = dm_request_body(text);

        let response = with_retries(self.retry, || self.post_json(&path, &body)).await?;
        let message_id = response
            .pointer("/data/dm_event_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        debug!(?message_id, "Direct message delivered");
        Ok(Ack { message_id })
    }

    /// Posts a public reply, retrying transient failures.
    #[instrument(skip_all, fields(post = %context.post_id))]
    pub async fn reply(&self, context: &ReplyContext, text: &str) -> Result<(), DeliveryError> {
        let body = reply_request_body(context, text);
        with_retries(self.retry, || self.post_json("/2/tweets", &body)).await?;
        debug!("Public reply posted");
        Ok(())
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, DeliveryError> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .map_err(DeliveryError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DeliveryError::from_status(status.as_u16(), text));
        }

        // Some endpoints answer 201 with an empty body.
        let bytes = response.bytes().await.map_err(DeliveryError::from_reqwest)?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| DeliveryError::permanent(format!("invalid response body: {}", e)))
    }
}

impl std::fmt::Debug for TwitterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitterClient")
            .field("api_base", &self.api_base)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl DeliveryGateway for TwitterClient {
    fn send<'a>(
        &'a self,
        recipient: &'a UserId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<Ack, DeliveryError>> {
        self.send_direct_message(recipient, text).boxed()
    }
}

impl FallbackChannel for TwitterClient {
    fn post_public_reply<'a>(
        &'a self,
        context: &'a ReplyContext,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        self.reply(context, text).boxed()
    }
}

fn dm_request_body(text: &str) -> Value {
    json!({ "text": text })
}

fn reply_request_body(context: &ReplyContext, text: &str) -> Value {
    json!({
        "text": text,
        "reply": { "in_reply_to_tweet_id": context.post_id.as_str() }
    })
}
