//! Raw Account Activity payload structures.
//!
//! These mirror the platform's webhook JSON. Every field is optional so that a
//! payload with missing pieces deserializes and is rejected by the classifier
//! instead of failing loudly.

use serde::Deserialize;
use serde_json::Value;

use crate::dedupe::EventKey;
use crate::types::UserId;

/// One platform event pulled out of a webhook batch, still as raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    /// An element of `direct_message_events`.
    DirectMessage(Value),
    /// An element of `tweet_create_events`.
    Tweet(Value),
}

impl RawEvent {
    /// The platform's id for this event, if it has a string one.
    pub fn event_key(&self) -> Option<EventKey> {
        match self {
            RawEvent::DirectMessage(value) => value
                .get("id")
                .and_then(Value::as_str)
                .map(EventKey::direct_message),
            RawEvent::Tweet(value) => value
                .get("id_str")
                .and_then(Value::as_str)
                .map(EventKey::tweet),
        }
    }
}

/// Splits a webhook body into its individual events.
///
/// A batch is only for us if its `for_user_id` is the bot's own id; any other
/// batch yields nothing. Missing or non-array event lists are treated as empty.
pub fn split_batch(body: &Value, bot_id: &UserId) -> Vec<RawEvent> {
    let for_us = body
        .get("for_user_id")
        .and_then(Value::as_str)
        .is_some_and(|id| id == bot_id.as_str());
    if !for_us {
        return Vec::new();
    }

    let direct_messages = array_field(body, "direct_message_events")
        .iter()
        .cloned()
        .map(RawEvent::DirectMessage);
    let tweets = array_field(body, "tweet_create_events")
        .iter()
        .cloned()
        .map(RawEvent::Tweet);

    direct_messages.chain(tweets).collect()
}

fn array_field<'a>(body: &'a Value, field: &str) -> &'a [Value] {
    body.get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

// ============================================================================
// direct_message_events[]
// ============================================================================

#[derive(Debug, Deserialize)]
pub(super) struct RawDirectMessageEvent {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub message_create: Option<RawMessageCreate>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawMessageCreate {
    pub target: Option<RawTarget>,
    pub sender_id: Option<String>,
    pub message_data: Option<RawMessageData>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawTarget {
    pub recipient_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawMessageData {
    pub text: Option<String>,
}

// ============================================================================
// tweet_create_events[]
// ============================================================================

#[derive(Debug, Deserialize)]
pub(super) struct RawTweet {
    pub id_str: Option<String>,
    pub text: Option<String>,
    pub user: Option<RawUser>,
    pub entities: Option<RawEntities>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawUser {
    pub id_str: Option<String>,
    pub screen_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawEntities {
    #[serde(default)]
    pub hashtags: Vec<RawHashtag>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawHashtag {
    pub text: Option<String>,
}
