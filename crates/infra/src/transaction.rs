//! Retryable transaction boundary for structural writes.
//!
//! Every mutation of the hierarchy runs as a closure against a fresh
//! [`HierarchyTx`]. Each attempt ends in exactly one [`Attempt`] outcome:
//!
//! ```text
//! begin → work(tx) → commit
//!            │          │
//!            │          ├─ Ok                → Committed
//!            ├─ Conflict ┴─ Conflict         → Retry (bounded, with backoff)
//!            └─ Domain / Backend             → Abort (never retried)
//! ```
//!
//! Domain failures (missing group, cycle) are returned to the caller on the
//! first attempt. Retrying them could only reproduce the same answer.

use std::thread;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use permgraph_core::DomainError;

use crate::config::RetryPolicy;
use crate::store::{HierarchyStore, HierarchyTx, StoreError};

/// Outcome of a single transaction attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Committed(T),
    /// Lost an optimistic race; the reason is kept for diagnostics.
    Retry(String),
    Abort(StoreError),
}

impl<T> Attempt<T> {
    fn failed(error: StoreError) -> Self {
        match error {
            StoreError::Conflict(reason) => Attempt::Retry(reason),
            other => Attempt::Abort(other),
        }
    }
}

/// Terminal outcome of a coordinated transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("transaction gave up after {attempts} attempts: {last_conflict}")]
    RetriesExhausted { attempts: u32, last_conflict: String },

    #[error("store backend failure: {0}")]
    Backend(String),
}

impl TransactionError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            TransactionError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for TransactionError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Domain(e) => TransactionError::Domain(e),
            StoreError::Backend(msg) => TransactionError::Backend(msg),
            StoreError::Conflict(reason) => TransactionError::RetriesExhausted {
                attempts: 1,
                last_conflict: reason,
            },
        }
    }
}

/// Runs closures inside store transactions, retrying on conflict.
#[derive(Debug, Clone, Default)]
pub struct TransactionCoordinator {
    policy: RetryPolicy,
}

impl TransactionCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `work` until it commits, fails terminally, or runs out of attempts.
    ///
    /// `work` may run several times, so it must not have side effects outside
    /// the transaction it is handed.
    pub fn execute<S, T, F>(&self, store: &S, mut work: F) -> Result<T, TransactionError>
    where
        S: HierarchyStore + ?Sized,
        F: FnMut(&mut dyn HierarchyTx) -> Result<T, StoreError>,
    {
        let tx_id = Uuid::now_v7();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match run_once(store, &mut work) {
                Attempt::Committed(value) => {
                    debug!(tx_id = %tx_id, attempt, "transaction committed");
                    return Ok(value);
                }
                Attempt::Abort(error) => {
                    debug!(tx_id = %tx_id, attempt, error = %error, "transaction aborted");
                    return Err(error.into());
                }
                Attempt::Retry(reason) => {
                    if attempt >= max_attempts {
                        warn!(
                            tx_id = %tx_id,
                            attempts = attempt,
                            reason = %reason,
                            "transaction retries exhausted"
                        );
                        return Err(TransactionError::RetriesExhausted {
                            attempts: attempt,
                            last_conflict: reason,
                        });
                    }

                    let delay = self.policy.backoff(attempt);
                    warn!(
                        tx_id = %tx_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "transaction conflict; retrying"
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
            }
        }
    }
}

fn run_once<S, T, F>(store: &S, work: &mut F) -> Attempt<T>
where
    S: HierarchyStore + ?Sized,
    F: FnMut(&mut dyn HierarchyTx) -> Result<T, StoreError>,
{
    let mut tx = match store.begin() {
        Ok(tx) => tx,
        Err(e) => return Attempt::failed(e),
    };

    let value = match work(&mut *tx) {
        Ok(value) => value,
        // Dropping `tx` discards its buffered writes.
        Err(e) => return Attempt::failed(e),
    };

    match tx.commit() {
        Ok(()) => Attempt::Committed(value),
        Err(e) => Attempt::failed(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use permgraph_auth::{HierarchyView, PermissionEntity};
    use permgraph_core::{EntityKind, EntityName};

    use super::*;
    use crate::store::InMemoryHierarchyStore;

    fn admin() -> EntityName {
        EntityName::new("admin").unwrap()
    }

    #[test]
    fn commits_on_first_attempt() {
        let store = InMemoryHierarchyStore::new();
        let coordinator = TransactionCoordinator::default();

        let out = coordinator
            .execute(&store, |tx| {
                tx.put_entity(PermissionEntity::group("admin")?)?;
                Ok(7)
            })
            .unwrap();

        assert_eq!(out, 7);
        assert!(store.entity(&admin(), EntityKind::Group).unwrap().is_some());
    }

    #[test]
    fn domain_errors_are_not_retried() {
        let store = InMemoryHierarchyStore::new();
        let coordinator = TransactionCoordinator::new(RetryPolicy::immediate(5));
        let calls = AtomicU32::new(0);

        let err = coordinator
            .execute(&store, |tx| -> Result<(), StoreError> {
                calls.fetch_add(1, Ordering::SeqCst);
                tx.put_entity(PermissionEntity::group("admin")?)?;
                Err(DomainError::missing_group("mod").into())
            })
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.domain(), Some(&DomainError::missing_group("mod")));
        assert!(store.entity(&admin(), EntityKind::Group).unwrap().is_none());
    }

    #[test]
    fn conflicts_are_retried_until_commit() {
        let store = InMemoryHierarchyStore::new();
        let coordinator = TransactionCoordinator::new(RetryPolicy::immediate(5));
        let calls = AtomicU32::new(0);

        let out = coordinator
            .execute(&store, |tx| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    return Err(StoreError::Conflict(format!("attempt {n}")));
                }
                tx.put_entity(PermissionEntity::group("admin")?)?;
                Ok(n)
            })
            .unwrap();

        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retries_are_bounded() {
        let store = InMemoryHierarchyStore::new();
        let coordinator = TransactionCoordinator::new(RetryPolicy::immediate(3));

        let err = coordinator
            .execute(&store, |_tx| -> Result<(), StoreError> {
                Err(StoreError::Conflict("always".to_string()))
            })
            .unwrap_err();

        assert_eq!(
            err,
            TransactionError::RetriesExhausted {
                attempts: 3,
                last_conflict: "always".to_string(),
            }
        );
    }

    #[test]
    fn backend_errors_abort() {
        let store = InMemoryHierarchyStore::new();
        let coordinator = TransactionCoordinator::new(RetryPolicy::immediate(3));

        let err = coordinator
            .execute(&store, |_tx| -> Result<(), StoreError> {
                Err(StoreError::Backend("disk on fire".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, TransactionError::Backend(_)));
    }
}
