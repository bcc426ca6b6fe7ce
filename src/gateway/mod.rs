//! Outbound delivery to the platform.
//!
//! The allocation service talks to the platform only through two traits:
//!
//! - [`DeliveryGateway`]: private message to the requester (the link itself,
//!   or a fixed denial text).
//! - [`FallbackChannel`]: best-effort public reply used when a private
//!   message could not be delivered.
//!
//! Both return boxed futures so that the service can hold them as trait
//! objects. [`TwitterClient`] implements both over HTTP; tests use recording
//! mocks.

mod error;
mod retry;
mod twitter;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::types::{ReplyContext, UserId};

pub use error::{DeliveryError, DeliveryErrorKind};
pub use retry::{RetryPolicy, with_retries};
pub use twitter::{DEFAULT_API_BASE, TwitterClient};

/// Acknowledgement of a delivered message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Platform id of the created message, when the platform returns one.
    pub message_id: Option<String>,
}

/// Sends a private message to a requester.
///
/// Implementations own their retry policy. The caller bounds the call with
/// its own timeout and treats any error as a failed delivery.
pub trait DeliveryGateway: Send + Sync {
    fn send<'a>(
        &'a self,
        recipient: &'a UserId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<Ack, DeliveryError>>;
}

/// Posts a public reply to an existing post.
pub trait FallbackChannel: Send + Sync {
    fn post_public_reply<'a>(
        &'a self,
        context: &'a ReplyContext,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), DeliveryError>>;
}
