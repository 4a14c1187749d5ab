use crate::db::error::DBError;
use crate::db::operations::RideTransaction;
use crate::db::storage::Storage;
use crate::metrics::TRANSACTION_RETRIES;
use futures_util::future::BoxFuture;
use log::{error, trace, warn};
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bounded exponential backoff with full jitter.
///
/// After the failed attempt number `n` (starting at 1) the executor sleeps a
/// duration drawn uniformly from `[0, min(max_backoff, initial_backoff * multiplier^(n-1))]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. At least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the sleep that follows failed attempt `attempt`.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Jittered sleep that follows failed attempt `attempt`.
    pub fn backoff<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        let ceiling_nanos = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(rng.gen_range(0..=ceiling_nanos))
    }
}

/// Runs operations in transactions and reruns them when the database aborts
/// the transaction because of a conflict.
///
/// The executor keeps no per-call state: clones share the cancellation token
/// and can be used concurrently on the same [`Storage`].
#[derive(Debug, Clone)]
pub struct TransactionExecutor {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl TransactionExecutor {
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` in a transaction of `storage` and returns its result once
    /// the transaction has committed.
    ///
    /// Every attempt reruns `op` from the start in a new transaction. Errors
    /// for which [`DBError::is_retryable`] is false are returned right away.
    /// When the last allowed attempt conflicts, its error is returned.
    /// [`DBError::Cancelled`] is returned if cancellation happens while
    /// waiting between attempts.
    pub async fn run<S, T, F>(&self, storage: &S, op: F) -> Result<T, DBError>
    where
        S: Storage,
        T: Send,
        F: for<'t> Fn(&'t dyn RideTransaction) -> BoxFuture<'t, Result<T, DBError>>
            + Send
            + Sync,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            trace!("Transaction attempt {attempt}/{max_attempts}");
            let error = match storage.run_once(&op).await {
                Ok(result) => return Ok(result),
                Err(error) => error,
            };
            if !error.is_retryable() {
                return Err(error);
            }
            if attempt >= max_attempts {
                error!(
                    "Transaction still conflicting after {attempt} attempts, giving up: {error}"
                );
                return Err(error);
            }

            let delay = self.policy.backoff(attempt, &mut rand::thread_rng());
            warn!("Transaction conflict on attempt {attempt}/{max_attempts}, retrying in {delay:?}: {error}");
            metrics::counter!(TRANSACTION_RETRIES).increment(1);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DBError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
