//! Event classification.
//!
//! Decides whether a raw platform event should trigger an allocation, and who
//! asked. [`classify`] is pure: no I/O, no logging, and the same input always
//! gives the same [`InboundEvent`].
//!
//! # Qualifying Rules
//!
//! - **Direct message**: `type == "message_create"` and the recipient is the
//!   bot. Message bodies are not filtered (see [`accepts_direct_message`]).
//! - **Public mention**: the post carries a hashtag equal to the configured
//!   marker (case-insensitive) and was not written by the bot itself.
//!
//! Anything else is [`EventKind::Unknown`] and never reaches the ledger.

pub mod raw;

use serde::{Deserialize, Serialize};

use crate::types::{ReplyContext, UserId};

pub use raw::{RawEvent, split_batch};

use raw::{RawDirectMessageEvent, RawTweet};

/// Hashtag that turns a public post into a request.
pub const DEFAULT_MARKER: &str = "UpDog";

/// Classifier settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// The bot's own platform identity.
    pub bot_id: UserId,
    /// Hashtag text (without `#`) that marks a public request.
    pub marker: String,
}

impl ClassifierConfig {
    pub fn new(bot_id: UserId) -> Self {
        ClassifierConfig {
            bot_id,
            marker: DEFAULT_MARKER.to_string(),
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }
}

/// What kind of request an event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DirectMessage,
    PublicMention,
    /// Not a request. Includes events that did not meet the qualifying rules.
    Unknown,
}

/// Why an event was classified as [`EventKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Expected fields were missing or had the wrong shape.
    Ambiguous,
    /// A DM event that is not a new message (e.g. a read receipt).
    NotMessageCreate,
    /// A DM addressed to someone other than the bot (including the bot's own
    /// outgoing messages).
    NotAddressedToBot,
    /// A DM refused by the content filter.
    ContentRejected,
    /// A post without the marker hashtag.
    MarkerMissing,
    /// A post written by the bot.
    SelfAuthored,
}

/// A classified inbound event. Built per request and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub kind: EventKind,

    /// Sender identity. Absent only when the payload did not carry one.
    pub requester_id: Option<UserId>,

    /// The message or post body (empty if absent).
    pub payload_text: String,

    /// Whether the marker hashtag was found. Only computed for posts.
    pub qualifying_marker_present: bool,

    /// Where to answer publicly. Present only for public mentions.
    pub reply_context: Option<ReplyContext>,

    /// Set exactly when `kind` is [`EventKind::Unknown`].
    pub rejection: Option<RejectReason>,
}

impl InboundEvent {
    /// Returns true if this event should go to the allocation service.
    pub fn qualifies(&self) -> bool {
        self.kind != EventKind::Unknown
    }

    fn rejected(
        reason: RejectReason,
        requester_id: Option<UserId>,
        payload_text: String,
        qualifying_marker_present: bool,
    ) -> Self {
        InboundEvent {
            kind: EventKind::Unknown,
            requester_id,
            payload_text,
            qualifying_marker_present,
            reply_context: None,
            rejection: Some(reason),
        }
    }
}

/// Classifies one raw event.
pub fn classify(config: &ClassifierConfig, event: &RawEvent) -> InboundEvent {
    match event {
        RawEvent::DirectMessage(value) => match RawDirectMessageEvent::deserialize(value) {
            Ok(raw) => classify_direct_message(config, raw),
            Err(_) => InboundEvent::rejected(RejectReason::Ambiguous, None, String::new(), false),
        },
        RawEvent::Tweet(value) => match RawTweet::deserialize(value) {
            Ok(raw) => classify_tweet(config, raw),
            Err(_) => InboundEvent::rejected(RejectReason::Ambiguous, None, String::new(), false),
        },
    }
}

/// Content filter for direct messages.
///
/// Every message body is accepted. The hook exists so product rules have a
/// single place to land; none have been defined.
pub fn accepts_direct_message(_text: &str, _sender: &UserId) -> bool {
    true
}

fn classify_direct_message(config: &ClassifierConfig, raw: RawDirectMessageEvent) -> InboundEvent {
    let create = raw.message_create;
    let sender = create
        .as_ref()
        .and_then(|c| c.sender_id.clone())
        .map(UserId::new);
    let text = create
        .as_ref()
        .and_then(|c| c.message_data.as_ref())
        .and_then(|d| d.text.clone())
        .unwrap_or_default();

    if raw.event_type.as_deref() != Some("message_create") {
        return InboundEvent::rejected(RejectReason::NotMessageCreate, sender, text, false);
    }

    let recipient = create
        .as_ref()
        .and_then(|c| c.target.as_ref())
        .and_then(|t| t.recipient_id.as_deref());
    match recipient {
        None => return InboundEvent::rejected(RejectReason::Ambiguous, sender, text, false),
        Some(id) if id != config.bot_id.as_str() => {
            return InboundEvent::rejected(RejectReason::NotAddressedToBot, sender, text, false);
        }
        Some(_) => {}
    }

    let Some(sender) = sender else {
        return InboundEvent::rejected(RejectReason::Ambiguous, None, text, false);
    };

    if !accepts_direct_message(&text, &sender) {
        return InboundEvent::rejected(RejectReason::ContentRejected, Some(sender), text, false);
    }

    InboundEvent {
        kind: EventKind::DirectMessage,
        requester_id: Some(sender),
        payload_text: text,
        qualifying_marker_present: false,
        reply_context: None,
        rejection: None,
    }
}

fn classify_tweet(config: &ClassifierConfig, raw: RawTweet) -> InboundEvent {
    let text = raw.text.unwrap_or_default();
    let sender = raw
        .user
        .as_ref()
        .and_then(|u| u.id_str.clone())
        .map(UserId::new);

    let marker = config.marker.to_lowercase();
    let marker_present = raw.entities.as_ref().is_some_and(|entities| {
        entities
            .hashtags
            .iter()
            .filter_map(|h| h.text.as_deref())
            .any(|tag| tag.to_lowercase() == marker)
    });

    if !marker_present {
        return InboundEvent::rejected(RejectReason::MarkerMissing, sender, text, false);
    }

    let Some(sender) = sender else {
        return InboundEvent::rejected(RejectReason::Ambiguous, None, text, true);
    };

    if sender == config.bot_id {
        return InboundEvent::rejected(RejectReason::SelfAuthored, Some(sender), text, true);
    }

    let screen_name = raw.user.as_ref().and_then(|u| u.screen_name.as_deref());
    let (Some(post_id), Some(screen_name)) = (raw.id_str, screen_name) else {
        return InboundEvent::rejected(RejectReason::Ambiguous, Some(sender), text, true);
    };

    InboundEvent {
        kind: EventKind::PublicMention,
        requester_id: Some(sender),
        payload_text: text,
        qualifying_marker_present: true,
        reply_context: Some(ReplyContext::new(post_id, screen_name)),
        rejection: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PostId;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    fn config() -> ClassifierConfig {
        ClassifierConfig::new(UserId::new("1000"))
    }

    fn dm(event_type: &str, recipient: &str, sender: &str, text: &str) -> RawEvent {
        RawEvent::DirectMessage(json!({
            "type": event_type,
            "id": "dm-1",
            "message_create": {
                "target": { "recipient_id": recipient },
                "sender_id": sender,
                "message_data": { "text": text }
            }
        }))
    }

    fn tweet(id: &str, sender: &str, screen_name: &str, hashtags: &[&str]) -> RawEvent {
        let tags: Vec<Value> = hashtags
            .iter()
            .map(|t| json!({ "text": t, "indices": [0, 1] }))
            .collect();
        RawEvent::Tweet(json!({
            "id_str": id,
            "text": "give me one",
            "user": { "id_str": sender, "screen_name": screen_name },
            "entities": { "hashtags": tags }
        }))
    }

    // ─── Direct messages ───

    #[test]
    fn dm_to_bot_qualifies() {
        let event = classify(&config(), &dm("message_create", "1000", "u555", "hi"));

        assert_eq!(event.kind, EventKind::DirectMessage);
        assert!(event.qualifies());
        assert_eq!(event.requester_id, Some(UserId::new("u555")));
        assert_eq!(event.payload_text, "hi");
        assert_eq!(event.reply_context, None);
        assert_eq!(event.rejection, None);
    }

    #[test]
    fn dm_with_any_body_qualifies() {
        let event = classify(&config(), &dm("message_create", "1000", "u1", ""));
        assert!(event.qualifies());
    }

    #[test]
    fn dm_to_someone_else_is_rejected() {
        // The bot's own outgoing DMs come back with the user as recipient.
        let event = classify(&config(), &dm("message_create", "u555", "1000", "your link"));

        assert_eq!(event.kind, EventKind::Unknown);
        assert_eq!(event.rejection, Some(RejectReason::NotAddressedToBot));
    }

    #[test]
    fn dm_of_other_type_is_rejected() {
        let event = classify(&config(), &dm("message_read", "1000", "u555", ""));
        assert_eq!(event.rejection, Some(RejectReason::NotMessageCreate));
    }

    #[test]
    fn dm_without_sender_is_ambiguous() {
        let raw = RawEvent::DirectMessage(json!({
            "type": "message_create",
            "message_create": { "target": { "recipient_id": "1000" } }
        }));
        let event = classify(&config(), &raw);

        assert_eq!(event.kind, EventKind::Unknown);
        assert_eq!(event.rejection, Some(RejectReason::Ambiguous));
    }

    #[test]
    fn dm_without_target_is_ambiguous() {
        let raw = RawEvent::DirectMessage(json!({
            "type": "message_create",
            "message_create": { "sender_id": "u1" }
        }));
        assert_eq!(
            classify(&config(), &raw).rejection,
            Some(RejectReason::Ambiguous)
        );
    }

    // ─── Public mentions ───

    #[test]
    fn mention_with_marker_qualifies_with_reply_context() {
        let event = classify(&config(), &tweet("p9", "u123", "bob", &["UpDog"]));

        assert_eq!(event.kind, EventKind::PublicMention);
        assert!(event.qualifying_marker_present);
        assert_eq!(event.requester_id, Some(UserId::new("u123")));
        assert_eq!(
            event.reply_context,
            Some(ReplyContext {
                post_id: PostId::new("p9"),
                handle: "@bob".to_string(),
            })
        );
    }

    #[test]
    fn marker_match_is_case_insensitive() {
        for tag in ["updog", "UPDOG", "uPdOg"] {
            let event = classify(&config(), &tweet("p1", "u1", "a", &[tag]));
            assert!(event.qualifies(), "tag {} should qualify", tag);
        }
    }

    #[test]
    fn marker_must_match_whole_hashtag() {
        let event = classify(&config(), &tweet("p1", "u1", "a", &["UpDogs", "Up"]));
        assert_eq!(event.rejection, Some(RejectReason::MarkerMissing));
    }

    #[test]
    fn marker_among_other_hashtags_qualifies() {
        let event = classify(&config(), &tweet("p1", "u1", "a", &["rust", "UpDog"]));
        assert!(event.qualifies());
    }

    #[test]
    fn post_without_marker_is_rejected() {
        let event = classify(&config(), &tweet("p1", "u1", "a", &[]));

        assert_eq!(event.kind, EventKind::Unknown);
        assert!(!event.qualifying_marker_present);
        assert_eq!(event.reply_context, None);
        assert_eq!(event.rejection, Some(RejectReason::MarkerMissing));
    }

    #[test]
    fn post_without_entities_is_rejected() {
        let raw = RawEvent::Tweet(json!({
            "id_str": "p1",
            "user": { "id_str": "u1", "screen_name": "a" }
        }));
        assert_eq!(
            classify(&config(), &raw).rejection,
            Some(RejectReason::MarkerMissing)
        );
    }

    #[test]
    fn bot_own_post_is_rejected() {
        let event = classify(&config(), &tweet("p1", "1000", "bot", &["UpDog"]));

        assert_eq!(event.kind, EventKind::Unknown);
        assert!(event.qualifying_marker_present);
        assert_eq!(event.rejection, Some(RejectReason::SelfAuthored));
    }

    #[test]
    fn custom_marker_is_used() {
        let config = config().with_marker("FreeLink");

        assert!(classify(&config, &tweet("p1", "u1", "a", &["freelink"])).qualifies());
        assert!(!classify(&config, &tweet("p1", "u1", "a", &["UpDog"])).qualifies());
    }

    #[test]
    fn mention_without_post_id_is_ambiguous() {
        let raw = RawEvent::Tweet(json!({
            "user": { "id_str": "u1", "screen_name": "a" },
            "entities": { "hashtags": [{ "text": "UpDog" }] }
        }));
        assert_eq!(
            classify(&config(), &raw).rejection,
            Some(RejectReason::Ambiguous)
        );
    }

    #[test]
    fn malformed_hashtags_are_ambiguous() {
        let raw = RawEvent::Tweet(json!({
            "id_str": "p1",
            "user": { "id_str": "u1", "screen_name": "a" },
            "entities": { "hashtags": "UpDog" }
        }));
        assert_eq!(
            classify(&config(), &raw).rejection,
            Some(RejectReason::Ambiguous)
        );
    }

    #[test]
    fn non_object_events_are_ambiguous() {
        for raw in [
            RawEvent::Tweet(json!(42)),
            RawEvent::DirectMessage(json!("text")),
        ] {
            assert_eq!(
                classify(&config(), &raw).rejection,
                Some(RejectReason::Ambiguous)
            );
        }
    }

    // ─── Properties ───

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-zA-Z0-9_]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::hash_map(
                    prop_oneof![
                        Just("type".to_string()),
                        Just("message_create".to_string()),
                        Just("entities".to_string()),
                        Just("hashtags".to_string()),
                        Just("user".to_string()),
                        Just("text".to_string()),
                        "[a-z_]{1,8}",
                    ],
                    inner,
                    0..4
                )
                .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        /// Arbitrary JSON never panics and classifying twice gives the same result.
        #[test]
        fn classify_is_total_and_deterministic(value in arb_json(), is_dm in any::<bool>()) {
            let raw = if is_dm {
                RawEvent::DirectMessage(value)
            } else {
                RawEvent::Tweet(value)
            };
            let first = classify(&config(), &raw);
            let second = classify(&config(), &raw);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.rejection.is_none(), first.qualifies());
        }

        /// Qualifying mentions always carry a reply context; nothing else does.
        #[test]
        fn reply_context_only_on_mentions(
            sender in "[0-9]{1,6}",
            tags in prop::collection::vec("[A-Za-z]{1,8}", 0..4),
        ) {
            let tag_refs: Vec<&str> = tags.iter().map(String::as_str).collect();
            let event = classify(&config(), &tweet("p1", &sender, "someone", &tag_refs));
            prop_assert_eq!(
                event.reply_context.is_some(),
                event.kind == EventKind::PublicMention
            );
        }
    }
}
