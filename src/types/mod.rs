//! Core domain types shared across the ledger, classifier and allocation service.

pub mod ids;

pub use ids::{CorrelationId, PostId, ReplyContext, UserId};
