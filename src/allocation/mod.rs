//! Allocation service: turns a qualifying event into a claim and a reply.
//!
//! # Request lifecycle
//!
//! ```text
//! Received → Classified → Rejected
//!                       → Claiming → Claimed → Delivering → Delivered
//!                                                         → DeliveryFailed → Compensating → Compensated
//!                                  → ClaimDenied → Delivering → ...
//! ```
//!
//! A denied claim (already claimed, pool exhausted) still gets its fixed text
//! delivered, but nothing after it ever touches the ledger.
//!
//! # Failure handling
//!
//! - Delivery is bounded by a timeout; a timeout counts as a failed delivery.
//! - A failed delivery of a fresh claim from a public mention is compensated:
//!   the claim is released and a public notice is posted.
//! - A failed delivery of a fresh claim from a DM follows [`DmFailurePolicy`].
//! - Ledger persistence failures are the only errors; every user-facing
//!   denial is a successful outcome.
//! - A release that cannot be persisted is retried, then parked. The next
//!   request from the same requester resumes the compensation instead of
//!   claiming again.

mod response;
mod service;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::task::JoinError;

use crate::classify::RejectReason;
use crate::gateway::DeliveryErrorKind;
use crate::ledger::StoreError;
use crate::types::{ReplyContext, UserId};

pub use response::{ALREADY_CLAIMED_TEXT, EXHAUSTED_TEXT, fallback_notice};
pub use service::{AllocationService, DEFAULT_DELIVERY_TIMEOUT, DEFAULT_RELEASE_RETRY};

/// Where a request is in its lifecycle. Only ever logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Received,
    Classified,
    Rejected,
    Claiming,
    Claimed,
    ClaimDenied,
    Delivering,
    Delivered,
    DeliveryFailed,
    Compensating,
    Compensated,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Received => "received",
            RequestState::Classified => "classified",
            RequestState::Rejected => "rejected",
            RequestState::Claiming => "claiming",
            RequestState::Claimed => "claimed",
            RequestState::ClaimDenied => "claim_denied",
            RequestState::Delivering => "delivering",
            RequestState::Delivered => "delivered",
            RequestState::DeliveryFailed => "delivery_failed",
            RequestState::Compensating => "compensating",
            RequestState::Compensated => "compensated",
        }
    }

    /// Returns true if no further transition can follow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Rejected
                | RequestState::Delivered
                | RequestState::DeliveryFailed
                | RequestState::Compensated
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the ledger answered, and therefore what the requester is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResponse {
    /// A fresh claim. The text sent is the link itself.
    Granted(String),

    /// The requester already holds this link.
    AlreadyClaimed(String),

    /// Nothing left to hand out.
    Exhausted,
}

impl ClaimResponse {
    /// The message delivered to the requester.
    pub fn text(&self) -> &str {
        match self {
            ClaimResponse::Granted(value) => value,
            ClaimResponse::AlreadyClaimed(_) => ALREADY_CLAIMED_TEXT,
            ClaimResponse::Exhausted => EXHAUSTED_TEXT,
        }
    }

    /// Returns true if this request took a link out of the pool.
    pub fn is_fresh(&self) -> bool {
        matches!(self, ClaimResponse::Granted(_))
    }
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    /// The event did not qualify. Nothing was claimed or sent.
    Rejected { reason: Option<RejectReason> },

    /// The requester got their message.
    Delivered {
        requester: UserId,
        response: ClaimResponse,
    },

    /// The message did not arrive and nothing was rolled back.
    DeliveryFailed {
        requester: UserId,
        response: ClaimResponse,
        error: DeliveryErrorKind,
    },

    /// The message did not arrive and the fresh claim was released.
    Compensated {
        requester: UserId,
        released: String,
        error: DeliveryErrorKind,
        /// Where the fallback notice went, if one was attempted.
        reply_context: Option<ReplyContext>,
        notice_posted: bool,
    },
}

impl AllocationOutcome {
    /// The terminal lifecycle state this outcome corresponds to.
    pub fn final_state(&self) -> RequestState {
        match self {
            AllocationOutcome::Rejected { .. } => RequestState::Rejected,
            AllocationOutcome::Delivered { .. } => RequestState::Delivered,
            AllocationOutcome::DeliveryFailed { .. } => RequestState::DeliveryFailed,
            AllocationOutcome::Compensated { .. } => RequestState::Compensated,
        }
    }
}

/// What to do when a DM carrying a fresh claim cannot be delivered.
///
/// A DM has no public thread to answer on, so there is no fallback notice
/// either way.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DmFailurePolicy {
    /// Keep the claim held. The requester can ask again and will be told
    /// they already have one.
    #[default]
    Retain,

    /// Release the claim back to the pool.
    Release,
}

/// Operational failures. A persistence failure is safe to retry with the
/// same event.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("ledger persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// A spawned task panicked or was cancelled by runtime shutdown.
    #[error("allocation task did not complete: {0}")]
    Task(#[from] JoinError),
}

impl AllocationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AllocationError::Persistence(_))
    }
}
