//! Background processing of accepted webhook batches.
//!
//! ```text
//! ┌───────────┐     ┌────────────────┐     ┌──────────────────────┐
//! │   axum    │ ──► │ dispatch_batch │ ──► │  AllocationService   │  one task per event
//! │ (accepts) │     │   + dedupe     │     └──────────────────────┘
//! └───────────┘     └────────────────┘
//!       │ returns 200 OK
//!       ▼
//! ```
//!
//! Each event runs once per [`EventKey`], however many times the platform
//! delivers it. Persistence failures are retried here with backoff; an event
//! that still fails gives its key back so a later redelivery can run it.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::AppState;
use crate::allocation::{AllocationError, AllocationOutcome, AllocationService};
use crate::classify::InboundEvent;
use crate::dedupe::EventKey;
use crate::gateway::RetryPolicy;
use crate::types::CorrelationId;

/// Waits of 1s, 2s, 4s, 8s, 16s between attempts of one event.
pub const DEFAULT_PERSISTENCE_RETRY: RetryPolicy = RetryPolicy {
    retries: 5,
    base: Duration::from_secs(1),
    cap: Duration::from_secs(30),
    factor: 2,
};

/// A qualifying event waiting to run.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// Absent when the platform gave the event no usable id.
    pub key: Option<EventKey>,
    pub event: InboundEvent,
}

/// Runs `events` in the background and returns immediately.
///
/// The work is tracked by the state's task tracker, so shutdown can wait
/// for it.
pub fn dispatch_batch(app_state: &AppState, internal_id: CorrelationId, events: Vec<QueuedEvent>) {
    let span = info_span!("batch", %internal_id, events = events.len());
    app_state
        .tasks()
        .spawn(run_batch(app_state.clone(), events).instrument(span));
}

async fn run_batch(app_state: AppState, events: Vec<QueuedEvent>) {
    let pruned = app_state.seen().prune_expired();
    if pruned > 0 {
        debug!(pruned, "Pruned expired event keys");
    }

    let retry = app_state.persistence_retry();
    let mut tasks = JoinSet::new();
    let mut keys = HashMap::new();
    for queued in events {
        if let Some(key) = &queued.key {
            if !app_state.seen().begin(key) {
                info!(%key, "Skipping redelivered event");
                continue;
            }
        }

        let service = app_state.allocation().clone();
        let span = info_span!(
            "event",
            key = queued.key.as_ref().map(EventKey::as_str),
            kind = ?queued.event.kind
        );
        let handle = tasks.spawn(run_event(service, queued.event, retry).instrument(span));
        if let Some(key) = queued.key {
            keys.insert(handle.id(), key);
        }
    }

    let mut failed = 0;
    while let Some(joined) = tasks.join_next_with_id().await {
        let id = match joined {
            Ok((_, Ok(outcome))) => {
                debug!(state = %outcome.final_state(), "Event processed");
                continue;
            }
            Ok((id, Err(e))) => {
                error!(error = %e, "Event processing failed");
                id
            }
            Err(e) => {
                error!(error = %e, "Event task did not complete");
                e.id()
            }
        };
        failed += 1;
        if let Some(key) = keys.remove(&id) {
            app_state.seen().forget(&key);
        }
    }

    if failed > 0 {
        warn!(failed, "Batch finished with failures");
    } else {
        info!("Batch processed");
    }
}

/// Processes one event, retrying while the failure is retryable.
async fn run_event(
    service: AllocationService,
    event: InboundEvent,
    retry: RetryPolicy,
) -> Result<AllocationOutcome, AllocationError> {
    let mut attempt = 0;
    loop {
        match service.process(&event).await {
            Err(e) if e.is_retryable() && attempt < retry.retries => {
                attempt += 1;
                let wait = retry.wait_before(attempt);
                warn!(attempt, ?wait, error = %e, "Event processing failed, retrying");
                tokio::time::sleep(wait).await;
            }
            result => return result,
        }
    }
}
