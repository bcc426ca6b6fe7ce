//! The allocation service itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{Instrument, debug, error, info, instrument, warn};

use super::{
    AllocationError, AllocationOutcome, ClaimResponse, DmFailurePolicy, RequestState,
    fallback_notice,
};
use crate::classify::{InboundEvent, RejectReason};
use crate::gateway::{
    Ack, DeliveryError, DeliveryErrorKind, DeliveryGateway, FallbackChannel, RetryPolicy,
};
use crate::ledger::{ClaimError, Ledger, ReleaseError};
use crate::types::{ReplyContext, UserId};

/// Upper bound on a single delivery (including the gateway's own retries).
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Waits of 100ms, 200ms, 400ms between release attempts.
pub const DEFAULT_RELEASE_RETRY: RetryPolicy = RetryPolicy {
    retries: 3,
    base: Duration::from_millis(100),
    cap: Duration::from_secs(1),
    factor: 2,
};

/// A compensation whose release could not be persisted yet.
#[derive(Debug, Clone)]
struct PendingRelease {
    value: String,
    error: DeliveryErrorKind,
    reply_context: Option<ReplyContext>,
}

/// Claims links for qualifying events and delivers them.
///
/// Cheap to clone; clones share the ledger and collaborators.
#[derive(Clone)]
pub struct AllocationService {
    ledger: Arc<Ledger>,
    gateway: Arc<dyn DeliveryGateway>,
    fallback: Arc<dyn FallbackChannel>,
    dm_failure_policy: DmFailurePolicy,
    delivery_timeout: Duration,
    release_retry: RetryPolicy,
    pending: Arc<Mutex<HashMap<UserId, PendingRelease>>>,
}

impl AllocationService {
    pub fn new(
        ledger: Arc<Ledger>,
        gateway: Arc<dyn DeliveryGateway>,
        fallback: Arc<dyn FallbackChannel>,
    ) -> Self {
        AllocationService {
            ledger,
            gateway,
            fallback,
            dm_failure_policy: DmFailurePolicy::default(),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            release_retry: DEFAULT_RELEASE_RETRY,
            pending: Arc::default(),
        }
    }

    pub fn with_dm_failure_policy(mut self, policy: DmFailurePolicy) -> Self {
        self.dm_failure_policy = policy;
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn with_release_retry(mut self, policy: RetryPolicy) -> Self {
        self.release_retry = policy;
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Returns true if `requester` has a release waiting to be persisted.
    pub fn has_pending_release(&self, requester: &UserId) -> bool {
        self.pending().contains_key(requester)
    }

    /// Runs one classified event to a terminal state.
    ///
    /// Everything from the claim onwards runs in its own task. Dropping the
    /// returned future does not stop it: a claim that was made is always
    /// delivered or compensated.
    ///
    /// A persistence error leaves nothing half done. Claims are rolled back,
    /// and a release that failed is parked so that processing the same event
    /// again finishes the compensation.
    #[instrument(skip_all, fields(kind = ?event.kind, requester = ?event.requester_id))]
    pub async fn process(&self, event: &InboundEvent) -> Result<AllocationOutcome, AllocationError> {
        transition(RequestState::Received, RequestState::Classified);
        if !event.qualifies() {
            transition(RequestState::Classified, RequestState::Rejected);
            debug!(reason = ?event.rejection, "Event does not qualify");
            return Ok(AllocationOutcome::Rejected {
                reason: event.rejection,
            });
        }

        let Some(requester) = event.requester_id.clone() else {
            transition(RequestState::Classified, RequestState::Rejected);
            return Ok(AllocationOutcome::Rejected {
                reason: Some(RejectReason::Ambiguous),
            });
        };

        let service = self.clone();
        let reply_context = event.reply_context.clone();
        let task = tokio::spawn(
            async move { service.claim_and_deliver(requester, reply_context).await }
                .in_current_span(),
        );
        task.await?
    }

    async fn claim_and_deliver(
        &self,
        requester: UserId,
        reply_context: Option<ReplyContext>,
    ) -> Result<AllocationOutcome, AllocationError> {
        let parked = self.pending().remove(&requester);
        if let Some(pending) = parked {
            info!("Resuming an unfinished release");
            transition(RequestState::DeliveryFailed, RequestState::Compensating);
            return self.finish_release(requester, pending).await;
        }

        transition(RequestState::Classified, RequestState::Claiming);
        let claimant = requester.clone();
        let claimed = self.on_ledger(move |ledger| ledger.claim(&claimant)).await?;
        let response = match claimed {
            Ok(value) => {
                transition(RequestState::Claiming, RequestState::Claimed);
                ClaimResponse::Granted(value)
            }
            Err(ClaimError::AlreadyClaimed { value }) => {
                transition(RequestState::Claiming, RequestState::ClaimDenied);
                ClaimResponse::AlreadyClaimed(value)
            }
            Err(ClaimError::PoolExhausted) => {
                transition(RequestState::Claiming, RequestState::ClaimDenied);
                warn!("Pool exhausted");
                ClaimResponse::Exhausted
            }
            Err(ClaimError::Persistence(e)) => {
                error!(error = %e, "Failed to persist claim");
                return Err(e.into());
            }
        };

        let claim_state = if response.is_fresh() {
            RequestState::Claimed
        } else {
            RequestState::ClaimDenied
        };
        transition(claim_state, RequestState::Delivering);

        let error = match self.deliver(&requester, response.text()).await {
            Ok(ack) => {
                transition(RequestState::Delivering, RequestState::Delivered);
                info!(
                    message_id = ?ack.message_id,
                    fresh = response.is_fresh(),
                    "Response delivered"
                );
                return Ok(AllocationOutcome::Delivered {
                    requester,
                    response,
                });
            }
            Err(e) => e,
        };

        transition(RequestState::Delivering, RequestState::DeliveryFailed);
        warn!(error = %error, "Delivery failed");

        let value = match response {
            ClaimResponse::Granted(value) => value,
            denied => {
                // A denial took nothing from the pool, so there is nothing to undo.
                return Ok(AllocationOutcome::DeliveryFailed {
                    requester,
                    response: denied,
                    error: error.kind,
                });
            }
        };

        if reply_context.is_none() && self.dm_failure_policy == DmFailurePolicy::Retain {
            warn!("Direct message failed; claim stays held");
            return Ok(AllocationOutcome::DeliveryFailed {
                requester,
                response: ClaimResponse::Granted(value),
                error: error.kind,
            });
        }

        transition(RequestState::DeliveryFailed, RequestState::Compensating);
        let pending = PendingRelease {
            value,
            error: error.kind,
            reply_context,
        };
        self.finish_release(requester, pending).await
    }

    async fn deliver(&self, requester: &UserId, text: &str) -> Result<Ack, DeliveryError> {
        match tokio::time::timeout(self.delivery_timeout, self.gateway.send(requester, text)).await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::timeout(self.delivery_timeout)),
        }
    }

    /// Releases the claim, then posts the fallback notice if the request came
    /// from a public post. If the release cannot be persisted the request is
    /// parked under its requester and the error returned.
    async fn finish_release(
        &self,
        requester: UserId,
        pending: PendingRelease,
    ) -> Result<AllocationOutcome, AllocationError> {
        if let Err(e) = self.release_claim(&requester).await {
            self.pending().insert(requester, pending);
            return Err(e);
        }

        let notice_posted = match &pending.reply_context {
            Some(context) => self.post_notice(context).await,
            None => false,
        };

        transition(RequestState::Compensating, RequestState::Compensated);
        match &pending.reply_context {
            Some(context) => info!(
                reply_context = %context,
                notice_posted,
                "Claim released after failed delivery"
            ),
            None => info!("Claim released after failed direct message"),
        }
        Ok(AllocationOutcome::Compensated {
            requester,
            released: pending.value,
            error: pending.error,
            reply_context: pending.reply_context,
            notice_posted,
        })
    }

    async fn post_notice(&self, context: &ReplyContext) -> bool {
        let notice = fallback_notice(&context.handle);
        let posted = tokio::time::timeout(
            self.delivery_timeout,
            self.fallback.post_public_reply(context, &notice),
        )
        .await
        .unwrap_or_else(|_| Err(DeliveryError::timeout(self.delivery_timeout)));
        match posted {
            Ok(()) => true,
            Err(e) => {
                warn!(reply_context = %context, error = %e, "Failed to post fallback notice");
                false
            }
        }
    }

    async fn release_claim(&self, requester: &UserId) -> Result<(), AllocationError> {
        let mut attempt = 0;
        loop {
            let holder = requester.clone();
            match self.on_ledger(move |ledger| ledger.release(&holder)).await? {
                Ok(()) => return Ok(()),
                Err(ReleaseError::NotFound(_)) => {
                    warn!("Claim already released");
                    return Ok(());
                }
                Err(ReleaseError::Persistence(e)) if attempt < self.release_retry.retries => {
                    attempt += 1;
                    let wait = self.release_retry.wait_before(attempt);
                    warn!(attempt, ?wait, error = %e, "Failed to persist release, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(ReleaseError::Persistence(e)) => {
                    error!(error = %e, "Failed to persist release");
                    return Err(e.into());
                }
            }
        }
    }

    /// Runs a ledger operation on the blocking pool; saves may fsync.
    async fn on_ledger<T, F>(&self, op: F) -> Result<T, AllocationError>
    where
        F: FnOnce(&Ledger) -> T + Send + 'static,
        T: Send + 'static,
    {
        let ledger = self.ledger.clone();
        Ok(tokio::task::spawn_blocking(move || op(&ledger)).await?)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<UserId, PendingRelease>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for AllocationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationService")
            .field("ledger", &self.ledger)
            .field("dm_failure_policy", &self.dm_failure_policy)
            .field("delivery_timeout", &self.delivery_timeout)
            .field("release_retry", &self.release_retry)
            .finish_non_exhaustive()
    }
}

fn transition(from: RequestState, to: RequestState) {
    debug!(from = %from, to = %to, "Request state");
}
