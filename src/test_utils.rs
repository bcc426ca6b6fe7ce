//! Shared test collaborators and webhook payload builders.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Value, json};

use crate::gateway::{Ack, DeliveryError, DeliveryErrorKind, DeliveryGateway, FallbackChannel};
use crate::types::{ReplyContext, UserId};

// ============================================================================
// Delivery gateway
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum StepResult {
    Succeed,
    Fail(DeliveryErrorKind),
    Hang,
}

#[derive(Debug, Clone, Copy)]
struct Step {
    delay: Option<Duration>,
    result: StepResult,
}

#[derive(Debug, Default)]
struct GatewayInner {
    script: VecDeque<Step>,
    sent: Vec<(UserId, String)>,
    completed: usize,
}

/// Records every send. Sends succeed unless a failure has been scripted.
#[derive(Debug, Clone, Default)]
pub struct RecordingGateway {
    inner: Arc<Mutex<GatewayInner>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, kind: DeliveryErrorKind) {
        self.push(None, StepResult::Fail(kind));
    }

    pub fn fail_next_after(&self, delay: Duration, kind: DeliveryErrorKind) {
        self.push(Some(delay), StepResult::Fail(kind));
    }

    pub fn succeed_next_after(&self, delay: Duration) {
        self.push(Some(delay), StepResult::Succeed);
    }

    /// The next send never answers.
    pub fn hang_next(&self) {
        self.push(None, StepResult::Hang);
    }

    pub fn sent(&self) -> Vec<(UserId, String)> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Number of sends that returned (successfully or not).
    pub fn completed(&self) -> usize {
        self.inner.lock().unwrap().completed
    }

    fn push(&self, delay: Option<Duration>, result: StepResult) {
        self.inner
            .lock()
            .unwrap()
            .script
            .push_back(Step { delay, result });
    }
}

impl DeliveryGateway for RecordingGateway {
    fn send<'a>(
        &'a self,
        recipient: &'a UserId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<Ack, DeliveryError>> {
        let step = {
            let mut inner = self.inner.lock().unwrap();
            inner.sent.push((recipient.clone(), text.to_string()));
            inner.script.pop_front().unwrap_or(Step {
                delay: None,
                result: StepResult::Succeed,
            })
        };

        async move {
            if let Some(delay) = step.delay {
                tokio::time::sleep(delay).await;
            }
            let result = match step.result {
                StepResult::Succeed => Ok(Ack {
                    message_id: Some(format!("dm-{}", recipient)),
                }),
                StepResult::Fail(kind) => Err(scripted_error(kind)),
                StepResult::Hang => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            };
            self.inner.lock().unwrap().completed += 1;
            result
        }
        .boxed()
    }
}

fn scripted_error(kind: DeliveryErrorKind) -> DeliveryError {
    match kind {
        DeliveryErrorKind::Transient => DeliveryError::from_status(503, "scripted"),
        DeliveryErrorKind::Permanent => DeliveryError::from_status(403, "scripted"),
        DeliveryErrorKind::Timeout => DeliveryError::timeout(Duration::ZERO),
    }
}

// ============================================================================
// Fallback channel
// ============================================================================

#[derive(Debug, Default)]
struct FallbackInner {
    posted: Vec<(ReplyContext, String)>,
    failing: bool,
}

/// Records every public reply attempt.
#[derive(Debug, Clone, Default)]
pub struct RecordingFallback {
    inner: Arc<Mutex<FallbackInner>>,
}

impl RecordingFallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent reply fails (after being recorded).
    pub fn fail_all(&self) {
        self.inner.lock().unwrap().failing = true;
    }

    pub fn posted(&self) -> Vec<(ReplyContext, String)> {
        self.inner.lock().unwrap().posted.clone()
    }
}

impl FallbackChannel for RecordingFallback {
    fn post_public_reply<'a>(
        &'a self,
        context: &'a ReplyContext,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        let failing = {
            let mut inner = self.inner.lock().unwrap();
            inner.posted.push((context.clone(), text.to_string()));
            inner.failing
        };
        let result = if failing {
            Err(DeliveryError::from_status(403, "scripted"))
        } else {
            Ok(())
        };
        futures::future::ready(result).boxed()
    }
}

// ============================================================================
// Webhook payloads
// ============================================================================

/// A `direct_message_events[]` element.
pub fn dm_event(sender: &str, recipient: &str, text: &str) -> Value {
    json!({
        "type": "message_create",
        "id": format!("dm-{}", sender),
        "message_create": {
            "target": { "recipient_id": recipient },
            "sender_id": sender,
            "message_data": { "text": text }
        }
    })
}

/// A `tweet_create_events[]` element.
pub fn mention_event(
    post_id: &str,
    sender: &str,
    screen_name: &str,
    text: &str,
    hashtags: &[&str],
) -> Value {
    let hashtags: Vec<Value> = hashtags.iter().map(|tag| json!({ "text": tag })).collect();
    json!({
        "id_str": post_id,
        "text": text,
        "user": { "id_str": sender, "screen_name": screen_name },
        "entities": { "hashtags": hashtags }
    })
}

/// A full Account Activity webhook body.
pub fn webhook_body(for_user_id: &str, dms: Vec<Value>, tweets: Vec<Value>) -> Value {
    let mut body = json!({ "for_user_id": for_user_id });
    if !dms.is_empty() {
        body["direct_message_events"] = Value::Array(dms);
    }
    if !tweets.is_empty() {
        body["tweet_create_events"] = Value::Array(tweets);
    }
    body
}
