//! Newtype wrappers for platform identifiers.
//!
//! Platform ids arrive as decimal strings (`id_str`, `sender_id`). They are kept
//! as strings rather than parsed to integers since they are only ever compared
//! and echoed back to the platform.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A platform user identity (the sender of a DM or a post).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(s: impl Into<String>) -> Self {
        UserId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        UserId(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

/// A public post identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub String);

impl PostId {
    pub fn new(s: impl Into<String>) -> Self {
        PostId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PostId {
    fn from(s: &str) -> Self {
        PostId(s.to_string())
    }
}

/// Identifier attached to every raw webhook body published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        CorrelationId(Uuid::new_v4())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where to post a public fallback notice if a DM cannot be delivered.
///
/// Only public mentions carry one; DMs have no public channel to answer on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplyContext {
    /// The post being replied to.
    pub post_id: PostId,
    /// Display handle of the author, including the leading `@`.
    pub handle: String,
}

impl ReplyContext {
    /// Builds a reply context, normalising the handle to start with `@`.
    pub fn new(post_id: impl Into<String>, screen_name: &str) -> Self {
        let handle = if screen_name.starts_with('@') {
            screen_name.to_string()
        } else {
            format!("@{}", screen_name)
        };
        ReplyContext {
            post_id: PostId::new(post_id),
            handle,
        }
    }
}

impl fmt::Display for ReplyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.post_id, self.handle)
    }
}
