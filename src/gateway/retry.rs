//! Backoff for platform API calls.
//!
//! Only [`DeliveryErrorKind::Transient`] failures are retried. The allocation
//! service's delivery timeout bounds the whole loop, so a long backoff
//! sequence is cut off there rather than here.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::error::{DeliveryError, DeliveryErrorKind};

/// How many times to call, and how long to wait between calls.
///
/// The wait before retry `n` (1-based) is `base * factor^(n-1)`, capped at
/// `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first call.
    pub retries: u32,
    pub base: Duration,
    pub cap: Duration,
    pub factor: u32,
}

impl RetryPolicy {
    /// Waits of 2s, 4s, 8s.
    pub const DEFAULT: Self = Self {
        retries: 3,
        base: Duration::from_secs(2),
        cap: Duration::from_secs(16),
        factor: 2,
    };

    /// One call, no retries.
    pub const NONE: Self = Self {
        retries: 0,
        base: Duration::ZERO,
        cap: Duration::ZERO,
        factor: 1,
    };

    pub fn new(retries: u32, base: Duration, cap: Duration, factor: u32) -> Self {
        Self {
            retries,
            base,
            cap,
            factor,
        }
    }

    /// The wait before retry `n`, counting from 1.
    pub fn wait_before(&self, n: u32) -> Duration {
        let growth = self.factor.saturating_pow(n.saturating_sub(1));
        self.base.saturating_mul(growth).min(self.cap)
    }

    /// Every wait this policy can incur, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.retries).map(|n| self.wait_before(n)).collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Calls `call` until it succeeds, fails non-transiently, or the policy's
/// retries are spent. The last error is returned.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, mut call: F) -> Result<T, DeliveryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DeliveryError>>,
{
    let mut retry = 0;
    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if err.kind != DeliveryErrorKind::Transient || retry == policy.retries {
            return Err(err);
        }
        retry += 1;

        let wait = policy.wait_before(retry);
        debug!(retry, ?wait, error = %err, "Transient delivery error, backing off");
        tokio::time::sleep(wait).await;
    }
}
