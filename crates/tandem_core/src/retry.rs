//! Retry wrapper for transactional units of work.

use crate::config::RetryConfig;
use crate::error::{CoreError, CoreResult};
use crate::transaction::{TransactionCoordinator, TransactionScope};
use crate::types::TransactionId;
use std::thread;
use tracing::{debug, error, warn};

/// Runs `work` inside a transaction, retrying the whole action on conflict.
///
/// Each attempt begins a fresh transaction, calls `work` with its id and
/// commits if `work` succeeds. When `work` fails the transaction is rolled
/// back first, so no attempt leaks locks or half-applied writes. If that
/// rollback fails its error is returned at once and nothing is retried.
/// Otherwise:
///
/// - [`CoreError::LockConflict`] and [`CoreError::Deadlock`] are retried
///   after an exponentially growing delay, up to `config.max_attempts`
///   attempts in total
/// - every other error is returned as is
///
/// Commit failures are never retried.
///
/// # Errors
///
/// Returns [`CoreError::RetriesExhausted`] naming `action` when every
/// attempt hit a conflict, the rollback error (usually
/// [`CoreError::CompensationFailed`]) when a failed attempt could not be
/// undone, or the first non-retryable error.
pub fn with_retry<T, F>(
    coordinator: &TransactionCoordinator,
    config: &RetryConfig,
    action: &str,
    mut work: F,
) -> CoreResult<T>
where
    F: FnMut(TransactionId) -> CoreResult<T>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let scope = TransactionScope::begin(coordinator)?;
        let txn = scope.id();

        let err = match work(txn) {
            Ok(value) => {
                scope.commit()?;
                return Ok(value);
            }
            Err(err) => err,
        };

        if let Err(rollback_err) = scope.rollback() {
            error!(
                txn = %txn,
                action,
                error = %rollback_err,
                cause = %err,
                "rollback after failure failed; not retrying"
            );
            return Err(rollback_err);
        }

        if !err.is_retryable() {
            return Err(err);
        }
        if attempt >= max_attempts {
            warn!(action, attempts = attempt, error = %err, "retries exhausted");
            return Err(CoreError::RetriesExhausted {
                action: action.to_string(),
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let delay = config.delay_for_attempt(attempt);
        debug!(action, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
        coordinator.record_retry();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use std::sync::Arc;
    use std::time::Duration;
    use tandem_store::InMemoryProvider;

    fn coordinator() -> TransactionCoordinator {
        TransactionCoordinator::new(Arc::new(InMemoryProvider::new()), CoordinatorConfig::default())
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts).with_initial_delay(Duration::from_millis(1))
    }

    #[test]
    fn success_commits_once() {
        let coord = coordinator();
        let value = with_retry(&coord, &fast(3), "noop", |_| Ok(7)).unwrap();
        assert_eq!(value, 7);
        let stats = coord.stats();
        assert_eq!(stats.transactions_committed, 1);
        assert_eq!(stats.retries, 0);
    }

    #[test]
    fn conflicts_are_retried_until_success() {
        let coord = coordinator();
        let mut calls = 0;
        let value = with_retry(&coord, &fast(3), "flaky", |txn| {
            calls += 1;
            if calls < 3 {
                Err(CoreError::lock_conflict(txn, "inventory.products.1"))
            } else {
                Ok(calls)
            }
        })
        .unwrap();
        assert_eq!(value, 3);
        let stats = coord.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.transactions_rolled_back, 2);
        assert_eq!(stats.transactions_committed, 1);
        assert!(coord.active_transactions().is_empty());
    }

    #[test]
    fn exhaustion_names_the_action() {
        let coord = coordinator();
        let err = with_retry(&coord, &fast(2), "place_order", |txn| -> CoreResult<()> {
            Err(CoreError::Deadlock {
                txn,
                cycle: vec![txn],
            })
        })
        .unwrap_err();
        match err {
            CoreError::RetriesExhausted {
                action, attempts, ..
            } => {
                assert_eq!(action, "place_order");
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn other_errors_are_not_retried() {
        let coord = coordinator();
        let mut calls = 0;
        let err = with_retry(&coord, &fast(5), "lookup", |_| -> CoreResult<()> {
            calls += 1;
            Err(CoreError::resource_not_found("product 42"))
        })
        .unwrap_err();
        assert!(matches!(err, CoreError::ResourceNotFound { .. }));
        assert_eq!(calls, 1);
        assert_eq!(coord.stats().transactions_rolled_back, 1);
    }
}
