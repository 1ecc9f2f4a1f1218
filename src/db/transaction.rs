/*!
 * Transaction Helper Utilities
 *
 * The atomic write step of every inventory mutation runs inside one database
 * transaction. When that step loses a race with a concurrent writer it is
 * re-run from the start, re-reading current rows, a bounded number of times.
 */

use sea_orm::DatabaseTransaction;
use sea_orm::TransactionTrait;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::db::DbPool;
use crate::errors::ServiceError;

const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Bounded retry policy for storage conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_backoff: Duration::ZERO,
        }
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Runs `attempt_fn` until it succeeds, fails with a non-retryable error, or
/// the retry budget is spent. Each invocation must open its own transaction
/// and re-read whatever state it depends on.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut attempt_fn: F,
) -> Result<T, ServiceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt <= policy.max_retries => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    operation = operation,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Storage conflict; retrying atomic write"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if err.is_retryable() {
                    error!(
                        operation = operation,
                        attempts = attempt,
                        "Storage conflict retries exhausted"
                    );
                }
                return Err(err);
            }
        }
    }
}

/// Opens a transaction on the pool.
pub async fn begin(db: &DbPool) -> Result<DatabaseTransaction, ServiceError> {
    db.begin().await.map_err(ServiceError::db_error)
}

/// Commits on success and rolls back on failure, so nothing from a failed
/// attempt is ever observable.
pub async fn finish<T>(
    txn: DatabaseTransaction,
    result: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    match result {
        Ok(value) => {
            txn.commit().await.map_err(ServiceError::db_error)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "Transaction rollback failed");
            }
            Err(err)
        }
    }
}
