//! Deduplication of redelivered webhook events.
//!
//! The platform may deliver the same event more than once. Each event carries
//! its own id (`id` for a direct message, `id_str` for a post), which makes a
//! key that survives redelivery. An event is only run once per key.
//!
//! # Key formats
//!
//! - direct message: `dm:<id>`
//! - post: `tweet:<id_str>`
//!
//! # TTL-based expiration
//!
//! Keys are stored with the time they were first seen. Keys older than the
//! retention period (default 24 hours) are pruned so the set stays bounded.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

/// Default TTL for dedupe keys (24 hours).
pub const DEFAULT_DEDUPE_TTL_HOURS: i64 = 24;

/// Identifies one platform event across deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey(String);

impl EventKey {
    pub fn direct_message(id: &str) -> Self {
        EventKey(format!("dm:{}", id))
    }

    pub fn tweet(id_str: &str) -> Self {
        EventKey(format!("tweet:{}", id_str))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keys of events that are running or have run.
///
/// A key is claimed with [`SeenEvents::begin`] before its event runs. If the
/// event never reaches a terminal state the key is handed back with
/// [`SeenEvents::forget`], so a later redelivery runs it again.
#[derive(Debug, Default)]
pub struct SeenEvents {
    keys: Mutex<HashMap<EventKey, DateTime<Utc>>>,
}

impl SeenEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key` as seen. Returns false if it already was, meaning the
    /// event is a duplicate and should be skipped.
    pub fn begin(&self, key: &EventKey) -> bool {
        let mut keys = self.lock();
        if keys.contains_key(key) {
            return false;
        }
        keys.insert(key.clone(), Utc::now());
        true
    }

    pub fn forget(&self, key: &EventKey) {
        self.lock().remove(key);
    }

    pub fn contains(&self, key: &EventKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Drops keys first seen before `cutoff`. Returns how many were dropped.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut keys = self.lock();
        let before = keys.len();
        keys.retain(|_, seen_at| *seen_at >= cutoff);
        before - keys.len()
    }

    /// Prunes keys older than the default TTL.
    pub fn prune_expired(&self) -> usize {
        self.prune_older_than(Utc::now() - chrono::Duration::hours(DEFAULT_DEDUPE_TTL_HOURS))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // The map is valid after any panic, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<EventKey, DateTime<Utc>>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
