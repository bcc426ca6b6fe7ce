//! Link Dispenser - hands out single-use links to users who DM or mention a bot.
//!
//! Each requester gets at most one link from a finite, durably stored pool.
//! Webhook events are classified, claimed against the ledger, and answered
//! by direct message; a failed DM to a mention's author is rolled back and
//! answered publicly instead.

pub mod allocation;
pub mod classify;
pub mod config;
pub mod dedupe;
pub mod fanout;
pub mod gateway;
pub mod ledger;
pub mod server;
pub mod types;

#[cfg(test)]
pub mod test_utils;
