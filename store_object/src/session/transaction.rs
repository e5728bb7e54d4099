use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use config::TransactionConfig;
use uuid::Uuid;

use crate::errors::StoreError;

#[derive(Debug, Default)]
struct TransactionState {
    doomed: bool,
    finished: bool,
    pool_id: Option<u64>,
    enlisted: Vec<u64>,
}

/// The transaction shared by a session's open scopes.
///
/// Handles record the transaction they are enlisted in. Once it is finished
/// without a commit, those handles are rolled back in the background as they
/// become free, or before their next lease when no runtime is available.
#[derive(Debug)]
pub(crate) struct AmbientTransaction {
    id: Uuid,
    started: Instant,
    timeout: Duration,
    allow_distributed: bool,
    state: Mutex<TransactionState>,
}

impl AmbientTransaction {
    pub(crate) fn new(config: &TransactionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
            timeout: Duration::from_secs(config.timeout_seconds),
            allow_distributed: config.allow_distributed,
            state: Mutex::new(TransactionState::default()),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.lock().finished
    }

    pub(crate) fn finish(&self) {
        self.lock().finished = true;
    }

    pub(crate) fn is_doomed(&self) -> bool {
        self.lock().doomed
    }

    /// The transaction can no longer commit
    pub(crate) fn doom(&self) {
        self.lock().doomed = true;
    }

    pub(crate) fn check_timeout(&self) -> Result<(), StoreError> {
        if self.started.elapsed() > self.timeout {
            self.doom();
            return Err(StoreError::TransactionTimeout(self.timeout));
        }
        Ok(())
    }

    /// Whether one more handle from `pool_id` may enlist. Returns `true`
    /// when the enlistment promotes the transaction to two-phase commit.
    pub(crate) fn admit(&self, pool_id: u64) -> Result<bool, StoreError> {
        self.check_timeout()?;
        let state = self.lock();
        if state.finished {
            return Err(StoreError::TransactionAborted(
                "the transaction has already completed".to_string(),
            ));
        }
        if state.doomed {
            return Err(StoreError::TransactionAborted(
                "an inner scope was dropped without completing".to_string(),
            ));
        }
        if state.pool_id.is_some_and(|id| id != pool_id) {
            return Err(StoreError::InvalidState(
                "a transaction scope cannot span two connection pools".to_string(),
            ));
        }
        let promoting = !state.enlisted.is_empty();
        if promoting && !self.allow_distributed {
            return Err(StoreError::DistributedTransactionDisabled);
        }
        Ok(promoting)
    }

    pub(crate) fn record_enlistment(&self, pool_id: u64, handle_id: u64) -> usize {
        let mut state = self.lock();
        state.pool_id = Some(pool_id);
        state.enlisted.push(handle_id);
        state.enlisted.len()
    }

    pub(crate) fn pool_id(&self) -> Option<u64> {
        self.lock().pool_id
    }

    pub(crate) fn enlisted_ids(&self) -> Vec<u64> {
        self.lock().enlisted.clone()
    }

    fn lock(&self) -> MutexGuard<'_, TransactionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
