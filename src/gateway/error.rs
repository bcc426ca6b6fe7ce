//! Delivery error types.
//!
//! Errors are split into transient and permanent so the HTTP client knows
//! what to retry:
//!
//! - **Transient**: 429, 5xx, connect/timeout failures. Retried with backoff.
//! - **Permanent**: other 4xx (closed DMs, blocked account, bad token).
//! - **Timeout**: the caller's delivery deadline passed. Never retried here;
//!   the allocation service treats it as a failed delivery.
//!
//! Whatever the kind, the allocation service sees the same thing: the
//! message did not arrive.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The kind of delivery error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// Safe to retry with backoff.
    Transient,

    /// Retrying will not help.
    Permanent,

    /// The caller-supplied deadline expired before the platform answered.
    Timeout,
}

impl DeliveryErrorKind {
    /// Returns true if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(self, DeliveryErrorKind::Transient)
    }
}

/// A failed send or public reply.
#[derive(Debug, Error)]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,

    /// The HTTP status code, if the platform answered at all.
    pub status_code: Option<u16>,

    pub message: String,

    /// The underlying transport error, if any.
    #[source]
    pub source: Option<reqwest::Error>,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "delivery failed (HTTP {}): {}", code, self.message),
            None => write!(f, "delivery failed: {}", self.message),
        }
    }
}

impl DeliveryError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: DeliveryErrorKind::Timeout,
            status_code: None,
            message: format!("no response within {:?}", after),
            source: None,
        }
    }

    /// Categorizes an HTTP error response by status code.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let kind = match status {
            429 => DeliveryErrorKind::Transient,
            code if (500..600).contains(&code) => DeliveryErrorKind::Transient,
            _ => DeliveryErrorKind::Permanent,
        };
        Self {
            kind,
            status_code: Some(status),
            message: body.into(),
            source: None,
        }
    }

    /// Categorizes a transport error.
    ///
    /// Connection and timeout failures are transient; anything else
    /// (bad URL, body encoding) is permanent.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let status_code = err.status().map(|s| s.as_u16());
        let kind = match status_code {
            Some(code) => Self::from_status(code, String::new()).kind,
            None if err.is_connect() || err.is_timeout() || err.is_request() => {
                DeliveryErrorKind::Transient
            }
            None => DeliveryErrorKind::Permanent,
        };
        Self {
            kind,
            status_code,
            message: err.to_string(),
            source: Some(err),
        }
    }
}
