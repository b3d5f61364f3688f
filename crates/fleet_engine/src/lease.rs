use std::sync::Arc;
use std::time::Duration;

use fleet_core::{RetryPolicy, WorkKind};
use fleet_logging::{fleet_debug, fleet_trace};
use thiserror::Error;
use tokio::time::Instant;

use crate::store::{CoordinationStore, StoreError, StoreOp};

#[derive(Debug, Clone)]
pub struct LeaseSettings {
    /// Policy for retrying a lease rejected by a concurrent writer.
    pub conflict_retry: RetryPolicy,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            conflict_retry: RetryPolicy::unbounded(Duration::from_millis(500)),
        }
    }
}

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease of {kind} for '{category}' was given no units")]
    EmptyBatch { kind: WorkKind, category: String },
    #[error("lease of {kind} for '{category}' still conflicting after {attempts} attempts")]
    RetriesExhausted {
        kind: WorkKind,
        category: String,
        attempts: u32,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseReceipt {
    pub units: usize,
    /// Commit attempts, including the successful one.
    pub attempts: u32,
}

/// Moves popped units into a category's pending journal.
///
/// The caller has already removed the units from the available pool; the
/// lease records them in `pending<Kind>:<category>` and registers the
/// category in `pending<Kind>`, both in one watched transaction.
pub struct WorkLeaseManager {
    store: Arc<dyn CoordinationStore>,
    settings: LeaseSettings,
}

impl WorkLeaseManager {
    pub fn new(store: Arc<dyn CoordinationStore>, settings: LeaseSettings) -> Self {
        Self { store, settings }
    }

    /// Lease `units`, retrying the whole transaction on conflict.
    ///
    /// Set union makes a retry after an ambiguous failure harmless.
    pub async fn lease(
        &self,
        kind: WorkKind,
        category: &str,
        units: &[String],
    ) -> Result<LeaseReceipt, LeaseError> {
        if units.is_empty() {
            return Err(LeaseError::EmptyBatch {
                kind,
                category: category.to_string(),
            });
        }

        let policy = self.settings.conflict_retry;
        let started = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_lease(kind, category, units).await {
                Ok(()) => {
                    fleet_trace!(
                        "leased {} {} of '{}' (attempts: {})",
                        units.len(),
                        kind,
                        category,
                        attempts
                    );
                    return Ok(LeaseReceipt {
                        units: units.len(),
                        attempts,
                    });
                }
                Err(StoreError::Conflict) => {
                    if !policy.allows_another(attempts, started.elapsed()) {
                        return Err(LeaseError::RetriesExhausted {
                            kind,
                            category: category.to_string(),
                            attempts,
                        });
                    }
                    fleet_debug!(
                        "lease of {} for '{}' conflicted (attempt {}), retrying in {:?}",
                        kind,
                        category,
                        attempts,
                        policy.delay
                    );
                    tokio::time::sleep(policy.delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn try_lease(
        &self,
        kind: WorkKind,
        category: &str,
        units: &[String],
    ) -> Result<(), StoreError> {
        let pending_key = kind.pending_pool_key(category);
        let index_key = kind.pending_index_key();
        let guard = self
            .store
            .watch(&[pending_key.clone(), index_key.clone()])
            .await?;
        self.store
            .commit(
                guard,
                vec![
                    StoreOp::add_all(pending_key, units),
                    StoreOp::add_all(index_key, &[category.to_string()]),
                ],
            )
            .await
    }
}
