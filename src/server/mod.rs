//! HTTP server for the link dispenser.
//!
//! # Endpoints
//!
//! - `GET /webhook/twitter` - CRC challenge (returns `{"response_token": ...}`)
//! - `POST /webhook/twitter` - Account Activity deliveries (answers 200 at once;
//!   events run in the background)
//! - `GET /api/v1/pool` - Pool counters as JSON
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

use tokio_util::task::TaskTracker;

pub mod dispatch;
pub mod health;
pub mod pool;
pub mod signature;
pub mod webhook;

pub use dispatch::{DEFAULT_PERSISTENCE_RETRY, QueuedEvent, dispatch_batch};
pub use health::health_handler;
pub use pool::pool_handler;
pub use webhook::{crc_handler, webhook_handler};

use crate::allocation::AllocationService;
use crate::classify::ClassifierConfig;
use crate::dedupe::SeenEvents;
use crate::fanout::NotificationFanout;
use crate::gateway::RetryPolicy;

/// Shared application state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
    persistence_retry: RetryPolicy,
}

struct AppStateInner {
    allocation: AllocationService,
    classifier: ClassifierConfig,
    fanout: Arc<dyn NotificationFanout>,

    /// Consumer secret for CRC answers and signature checks. Without it,
    /// signatures are not checked and CRC challenges are refused.
    consumer_secret: Option<Vec<u8>>,

    seen: SeenEvents,

    /// Batches still being processed after their webhook was answered.
    tasks: TaskTracker,
}

impl AppState {
    pub fn new(
        allocation: AllocationService,
        classifier: ClassifierConfig,
        fanout: Arc<dyn NotificationFanout>,
        consumer_secret: Option<Vec<u8>>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                allocation,
                classifier,
                fanout,
                consumer_secret,
                seen: SeenEvents::new(),
                tasks: TaskTracker::new(),
            }),
            persistence_retry: DEFAULT_PERSISTENCE_RETRY,
        }
    }

    pub fn with_persistence_retry(mut self, policy: RetryPolicy) -> Self {
        self.persistence_retry = policy;
        self
    }

    pub fn allocation(&self) -> &AllocationService {
        &self.inner.allocation
    }

    pub fn classifier(&self) -> &ClassifierConfig {
        &self.inner.classifier
    }

    pub fn fanout(&self) -> &dyn NotificationFanout {
        self.inner.fanout.as_ref()
    }

    pub fn consumer_secret(&self) -> Option<&[u8]> {
        self.inner.consumer_secret.as_deref()
    }

    pub fn seen(&self) -> &SeenEvents {
        &self.inner.seen
    }

    pub fn tasks(&self) -> &TaskTracker {
        &self.inner.tasks
    }

    pub fn persistence_retry(&self) -> RetryPolicy {
        self.persistence_retry
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/webhook/twitter", get(crc_handler).post(webhook_handler))
        .route("/api/v1/pool", get(pool_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
