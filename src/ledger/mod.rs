//! The resource ledger: a finite pool of single-use resources keyed by
//! requester identity.
//!
//! # Guarantees
//!
//! - A requester holds at most one resource at a time.
//! - A resource is never held by two requesters.
//! - Claims take the lowest-index unclaimed record. Records keep their
//!   position for their whole life; "claimed" is a field, not a location.
//! - Every claim and release is written through to the [`BackingStore`]
//!   before the call returns. If the write fails, the in-memory sequence is
//!   restored so it never runs ahead of what is on disk.
//!
//! # Concurrency
//!
//! All reads and mutations go through one mutex that also covers the store
//! write, so concurrent claims from a webhook batch are serialized.

pub mod import;
pub mod record;
pub mod store;

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::types::UserId;

pub use import::{import_plain_lines, parse_plain_lines};
pub use record::{PoolStats, ResourceRecord};
pub use store::{BackingStore, FileStore, MemoryStore, StoreError};

/// Errors when opening or bulk-loading a ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The loaded sequence gives one requester more than one resource.
    #[error("requester {claimant} holds more than one resource")]
    DuplicateClaimant { claimant: UserId },
}

/// Why a claim did not hand out a new resource.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// The requester already holds `value`. Replays land here.
    #[error("requester already holds a resource")]
    AlreadyClaimed { value: String },

    /// Every record is claimed.
    #[error("no unclaimed resources remain")]
    PoolExhausted,

    /// The claim could not be made durable and was not applied.
    #[error("failed to persist claim: {0}")]
    Persistence(#[from] StoreError),
}

/// Why a release did nothing.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// The requester holds no resource.
    #[error("requester {0} holds no resource")]
    NotFound(UserId),

    /// The release could not be made durable and was not applied.
    #[error("failed to persist release: {0}")]
    Persistence(#[from] StoreError),
}

struct LedgerInner {
    records: Vec<ResourceRecord>,
    store: Box<dyn BackingStore>,
}

/// The shared resource pool.
pub struct Ledger {
    inner: Mutex<LedgerInner>,
}

impl Ledger {
    /// Loads the full sequence from `store`.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read or if the stored records break the
    /// one-resource-per-requester rule.
    pub fn open(store: impl BackingStore + 'static) -> Result<Self, LedgerError> {
        let records = store.load()?;
        check_unique_claimants(&records)?;

        let stats = PoolStats::from_records(&records);
        info!(
            total = stats.total,
            claimed = stats.claimed,
            unclaimed = stats.unclaimed,
            "Opened resource ledger"
        );

        Ok(Ledger {
            inner: Mutex::new(LedgerInner {
                records,
                store: Box::new(store),
            }),
        })
    }

    /// Claims a resource for `requester`.
    ///
    /// Returns the resource value on a fresh claim. A requester who already
    /// holds a resource gets [`ClaimError::AlreadyClaimed`] carrying the same
    /// value, and the pool is left alone.
    pub fn claim(&self, requester: &UserId) -> Result<String, ClaimError> {
        let mut inner = self.lock();

        let mut first_unclaimed = None;
        for (idx, record) in inner.records.iter().enumerate() {
            match &record.claimant {
                Some(claimant) if claimant == requester => {
                    debug!(requester = %requester, "Requester already holds a resource");
                    return Err(ClaimError::AlreadyClaimed {
                        value: record.value.clone(),
                    });
                }
                Some(_) => {}
                None if first_unclaimed.is_none() => first_unclaimed = Some(idx),
                None => {}
            }
        }

        let Some(idx) = first_unclaimed else {
            debug!(requester = %requester, "Pool exhausted");
            return Err(ClaimError::PoolExhausted);
        };

        inner.records[idx].claimant = Some(requester.clone());
        let LedgerInner { records, store } = &mut *inner;
        if let Err(e) = store.save(records) {
            records[idx].claimant = None;
            error!(requester = %requester, error = %e, "Failed to persist claim; rolled back");
            return Err(ClaimError::Persistence(e));
        }

        debug!(requester = %requester, index = idx, "Claimed resource");
        Ok(inner.records[idx].value.clone())
    }

    /// Returns the resource held by `requester` to the unclaimed pool.
    pub fn release(&self, requester: &UserId) -> Result<(), ReleaseError> {
        let mut inner = self.lock();

        let Some(idx) = inner.records.iter().position(|r| r.is_held_by(requester)) else {
            warn!(requester = %requester, "Release requested but requester holds nothing");
            return Err(ReleaseError::NotFound(requester.clone()));
        };

        let previous = inner.records[idx].claimant.take();
        let LedgerInner { records, store } = &mut *inner;
        if let Err(e) = store.save(records) {
            records[idx].claimant = previous;
            error!(requester = %requester, error = %e, "Failed to persist release; rolled back");
            return Err(ReleaseError::Persistence(e));
        }

        debug!(requester = %requester, index = idx, "Released resource");
        Ok(())
    }

    /// Appends new records to the pool, e.g. from a plain text import.
    ///
    /// Returns the number of records added.
    pub fn bulk_load(&self, new_records: Vec<ResourceRecord>) -> Result<usize, LedgerError> {
        let mut inner = self.lock();

        let mut combined = inner.records.clone();
        combined.extend(new_records);
        check_unique_claimants(&combined)?;

        inner.store.save(&combined)?;
        let added = combined.len() - inner.records.len();
        inner.records = combined;

        info!(added, "Bulk loaded resources");
        Ok(added)
    }

    /// The resource currently held by `requester`, if any.
    pub fn holder_of(&self, requester: &UserId) -> Option<String> {
        self.lock()
            .records
            .iter()
            .find(|r| r.is_held_by(requester))
            .map(|r| r.value.clone())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats::from_records(&self.lock().records)
    }

    /// A copy of the current sequence, in stored order.
    pub fn records(&self) -> Vec<ResourceRecord> {
        self.lock().records.clone()
    }

    /// Locks the pool.
    ///
    /// A panic while the lock was held may have left a mutation applied in
    /// memory but not on disk, so a poisoned lock resynchronises from the
    /// store before continuing.
    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                match guard.store.load() {
                    Ok(records) => guard.records = records,
                    Err(e) => error!(error = %e, "Failed to reload ledger after poisoned lock"),
                }
                self.inner.clear_poison();
                guard
            }
        }
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn check_unique_claimants(records: &[ResourceRecord]) -> Result<(), LedgerError> {
    let mut seen = HashSet::new();
    for claimant in records.iter().filter_map(|r| r.claimant.as_ref()) {
        if !seen.insert(claimant) {
            return Err(LedgerError::DuplicateClaimant {
                claimant: claimant.clone(),
            });
        }
    }
    Ok(())
}
