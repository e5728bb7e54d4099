//! Connection pool for one connection target.
//!
//! Every handle the pool has opened is either on the free list or in the
//! allocated set, never both, except while an abandoned transaction is being
//! rolled back on it. Freed handles are kept open for reuse; they are only
//! closed when the pool is closed or their connection fails.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use config::DEFAULT_LEAK_THRESHOLD;

use super::transaction::AmbientTransaction;
use crate::backend::{ConnectionTarget, Connector, ProcedureConnection};
use crate::errors::StoreError;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Called with the allocated count whenever it exceeds the leak threshold
pub type LeakHook = Arc<dyn Fn(usize) + Send + Sync>;

/// An open connection owned by a pool
pub struct PooledHandle<Conn> {
    id: u64,
    connection: Conn,
    enlistment: Option<Arc<AmbientTransaction>>,
}

impl<Conn> PooledHandle<Conn> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connection(&mut self) -> &mut Conn {
        &mut self.connection
    }

    /// Whether the handle is inside a transaction scope's transaction
    pub fn is_enlisted(&self) -> bool {
        self.enlistment.is_some()
    }

    fn joined(&self, transaction: &Arc<AmbientTransaction>) -> bool {
        self.enlistment
            .as_ref()
            .is_some_and(|enlisted| Arc::ptr_eq(enlisted, transaction))
    }

    pub(crate) fn is_stale(&self) -> bool {
        self.enlistment
            .as_ref()
            .is_some_and(|enlisted| enlisted.is_finished())
    }
}

impl<Conn> fmt::Debug for PooledHandle<Conn> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledHandle")
            .field("id", &self.id)
            .field("enlisted", &self.is_enlisted())
            .finish()
    }
}

struct PoolState<Conn> {
    free: Vec<PooledHandle<Conn>>,
    allocated: HashSet<u64>,
    next_handle: u64,
    disposed: bool,
}

/// Pick a free handle: one already in `transaction`, else one left behind by
/// a finished transaction (so its rollback is not postponed), else an idle one
fn take_free<Conn>(
    free: &mut Vec<PooledHandle<Conn>>,
    transaction: Option<&Arc<AmbientTransaction>>,
) -> Option<PooledHandle<Conn>> {
    let joined = transaction.and_then(|t| free.iter().rposition(|h| h.joined(t)));
    let index = joined
        .or_else(|| free.iter().rposition(PooledHandle::is_stale))
        .or_else(|| free.iter().rposition(|h| !h.is_enlisted()))?;
    Some(free.swap_remove(index))
}

async fn close_handle<Conn: ProcedureConnection>(handle: PooledHandle<Conn>) {
    let id = handle.id;
    if let Err(error) = handle.connection.close().await {
        tracing::warn!(handle = id, error = %error, "error closing pooled connection");
    }
}

pub struct ConnectionPool<C: Connector> {
    id: u64,
    connector: Arc<C>,
    target: ConnectionTarget,
    leak_threshold: usize,
    leak_hook: Option<LeakHook>,
    state: Mutex<PoolState<C::Connection>>,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: Arc<C>, target: ConnectionTarget) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            connector,
            target,
            leak_threshold: DEFAULT_LEAK_THRESHOLD,
            leak_hook: None,
            state: Mutex::new(PoolState {
                free: Vec::new(),
                allocated: HashSet::new(),
                next_handle: 0,
                disposed: false,
            }),
        }
    }

    pub fn with_leak_threshold(mut self, threshold: usize) -> Self {
        self.leak_threshold = threshold;
        self
    }

    pub fn with_leak_hook(mut self, hook: LeakHook) -> Self {
        self.leak_hook = Some(hook);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Lease a handle outside any transaction scope. It must be given back
    /// with [`free`](Self::free); prefer [`PooledConnection`](super::PooledConnection),
    /// which does that on drop.
    pub async fn allocate(&self) -> Result<PooledHandle<C::Connection>, StoreError> {
        self.allocate_in(None).await
    }

    pub(crate) async fn allocate_in(
        &self,
        transaction: Option<&Arc<AmbientTransaction>>,
    ) -> Result<PooledHandle<C::Connection>, StoreError> {
        let reused = {
            let mut state = self.lock();
            if state.disposed {
                return Err(self.closed_error());
            }
            take_free(&mut state.free, transaction)
        };
        let mut handle = match reused {
            Some(handle) => handle,
            None => self.open_handle().await?,
        };

        let stale = handle
            .enlistment
            .as_ref()
            .is_some_and(|enlisted| !transaction.is_some_and(|t| Arc::ptr_eq(enlisted, t)));
        if stale {
            handle.enlistment = None;
            crate::debug_log!(handle = handle.id, "rolling back work of an abandoned transaction");
            if let Err(error) = handle.connection.rollback().await {
                tracing::warn!(handle = handle.id, error = %error, "discarding connection that failed to roll back");
                close_handle(handle).await;
                return Err(error);
            }
        }

        if let Some(transaction) = transaction {
            if !handle.is_enlisted() {
                let promoting = match transaction.admit(self.id) {
                    Ok(promoting) => promoting,
                    Err(error) => {
                        self.put_back(handle);
                        return Err(error);
                    }
                };
                if let Err(error) = handle.connection.begin().await {
                    tracing::warn!(handle = handle.id, error = %error, "discarding connection that failed to begin a transaction");
                    close_handle(handle).await;
                    return Err(error);
                }
                let enlisted = transaction.record_enlistment(self.id, handle.id);
                handle.enlistment = Some(Arc::clone(transaction));
                if promoting {
                    tracing::debug!(
                        transaction = %transaction.id(),
                        enlisted,
                        "transaction promoted to two-phase commit"
                    );
                }
            }
        }

        let allocated = {
            let mut state = self.lock();
            if state.disposed {
                None
            } else {
                state.allocated.insert(handle.id);
                Some(state.allocated.len())
            }
        };
        let Some(allocated) = allocated else {
            close_handle(handle).await;
            return Err(self.closed_error());
        };

        if allocated > self.leak_threshold {
            tracing::warn!(
                allocated,
                threshold = self.leak_threshold,
                connection = %self.target,
                "probable connection leak: too many connections allocated at once"
            );
            if let Some(hook) = &self.leak_hook {
                hook(allocated);
            }
        }
        crate::trace_log!(handle = handle.id, allocated, "allocated connection");
        Ok(handle)
    }

    /// Return a handle to the free list
    pub fn free(&self, handle: PooledHandle<C::Connection>) {
        let mut state = self.lock();
        if !state.allocated.remove(&handle.id) {
            tracing::warn!(handle = handle.id, "freed a connection this pool did not allocate");
            return;
        }
        if !state.disposed {
            crate::trace_log!(handle = handle.id, "freed connection");
            state.free.push(handle);
        }
    }

    /// Return a handle whose transaction ended while it was leased; its
    /// uncommitted work is rolled back before it is offered again
    pub(crate) fn free_abandoned(pool: &Arc<Self>, handle: PooledHandle<C::Connection>) {
        if !pool.lock().allocated.remove(&handle.id) {
            tracing::warn!(handle = handle.id, "freed a connection this pool did not allocate");
            return;
        }
        Self::roll_back_detached(pool, vec![handle]);
    }

    /// Roll back handles of an abandoned transaction on the current tokio
    /// runtime. Without a runtime they go back on the free list and are
    /// rolled back when next allocated.
    pub(crate) fn roll_back_detached(pool: &Arc<Self>, handles: Vec<PooledHandle<C::Connection>>) {
        if handles.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let pool = Arc::clone(pool);
                runtime.spawn(async move { pool.roll_back_abandoned(handles).await });
            }
            Err(_) => {
                tracing::debug!(
                    count = handles.len(),
                    "no async runtime; abandoned connections roll back when next leased"
                );
                for handle in handles {
                    pool.put_back(handle);
                }
            }
        }
    }

    /// Roll back handles that sit in neither the free list nor the allocated
    /// set, then offer them again. A handle that fails to roll back is closed.
    pub(crate) async fn roll_back_abandoned(&self, handles: Vec<PooledHandle<C::Connection>>) {
        for mut handle in handles {
            handle.enlistment = None;
            if let Err(error) = handle.connection.rollback().await {
                tracing::warn!(handle = handle.id, error = %error, "discarding connection that failed to roll back");
                close_handle(handle).await;
                continue;
            }
            crate::debug_log!(handle = handle.id, "rolled back abandoned transaction");
            let closing = {
                let mut state = self.lock();
                if state.disposed {
                    Some(handle)
                } else {
                    state.free.push(handle);
                    None
                }
            };
            if let Some(handle) = closing {
                close_handle(handle).await;
            }
        }
    }

    /// Drop an allocated handle whose connection can no longer be trusted
    pub(crate) fn discard(&self, handle: PooledHandle<C::Connection>) {
        if let Some(transaction) = &handle.enlistment {
            transaction.doom();
        }
        self.lock().allocated.remove(&handle.id);
        tracing::debug!(handle = handle.id, "discarded broken connection");
    }

    pub fn allocated_count(&self) -> usize {
        self.lock().allocated.len()
    }

    pub fn free_count(&self) -> usize {
        self.lock().free.len()
    }

    pub fn is_idle(&self) -> bool {
        self.allocated_count() == 0
    }

    /// Fails while any handle is still leased
    pub fn assert_idle(&self) -> Result<(), StoreError> {
        match self.allocated_count() {
            0 => Ok(()),
            allocated => Err(StoreError::PoolNotIdle { allocated }),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// Close every free handle. Handles still leased are closed when they
    /// come back. Closing twice is a no-op.
    pub async fn close(&self) {
        let handles = {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.free)
        };
        let closed = handles.len();
        for handle in handles {
            close_handle(handle).await;
        }
        tracing::debug!(closed, connection = %self.target, "connection pool closed");
    }

    /// Take every free handle enlisted in `transaction` so it can be
    /// committed. Fails if an enlisted handle is still leased.
    pub(crate) fn take_enlisted(
        &self,
        transaction: &Arc<AmbientTransaction>,
    ) -> Result<Vec<PooledHandle<C::Connection>>, StoreError> {
        let mut state = self.lock();
        let leased = transaction
            .enlisted_ids()
            .iter()
            .filter(|id| state.allocated.contains(id))
            .count();
        if leased > 0 {
            return Err(StoreError::InvalidState(format!(
                "{} connection(s) enlisted in the transaction are still in use",
                leased
            )));
        }
        Ok(Self::drain_enlisted(&mut state, transaction))
    }

    /// Take the free handles enlisted in `transaction`, counted as allocated;
    /// leased ones are rolled back when they are released
    pub(crate) fn take_enlisted_free(
        &self,
        transaction: &Arc<AmbientTransaction>,
    ) -> Vec<PooledHandle<C::Connection>> {
        Self::drain_enlisted(&mut self.lock(), transaction)
    }

    /// Take the free handles enlisted in `transaction` out of the pool
    /// altogether, for [`roll_back_abandoned`](Self::roll_back_abandoned)
    pub(crate) fn detach_enlisted_free(
        &self,
        transaction: &Arc<AmbientTransaction>,
    ) -> Vec<PooledHandle<C::Connection>> {
        Self::split_enlisted(&mut self.lock(), transaction)
    }

    fn split_enlisted(
        state: &mut PoolState<C::Connection>,
        transaction: &Arc<AmbientTransaction>,
    ) -> Vec<PooledHandle<C::Connection>> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.free)
            .into_iter()
            .partition(|handle| handle.joined(transaction));
        state.free = kept;
        taken
    }

    fn drain_enlisted(
        state: &mut PoolState<C::Connection>,
        transaction: &Arc<AmbientTransaction>,
    ) -> Vec<PooledHandle<C::Connection>> {
        let taken = Self::split_enlisted(state, transaction);
        for handle in &taken {
            state.allocated.insert(handle.id);
        }
        taken
    }

    /// Give back handles taken for commit or rollback, now outside the
    /// transaction
    pub(crate) fn restore(&self, handles: Vec<PooledHandle<C::Connection>>) {
        for mut handle in handles {
            handle.enlistment = None;
            self.free(handle);
        }
    }

    fn put_back(&self, handle: PooledHandle<C::Connection>) {
        let mut state = self.lock();
        if !state.disposed {
            state.free.push(handle);
        }
    }

    async fn open_handle(&self) -> Result<PooledHandle<C::Connection>, StoreError> {
        let connection = self.connector.connect(&self.target).await?;
        let id = {
            let mut state = self.lock();
            state.next_handle += 1;
            state.next_handle
        };
        crate::debug_log!(handle = id, connection = %self.target, "opened new pooled connection");
        Ok(PooledHandle {
            id,
            connection,
            enlistment: None,
        })
    }

    fn closed_error(&self) -> StoreError {
        StoreError::InvalidState(format!(
            "connection pool for {} has been closed",
            self.target
        ))
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<C::Connection>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ConnectionPool")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("free", &state.free.len())
            .field("allocated", &state.allocated.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryConnector, MemoryDatabase};
    use config::TransactionConfig;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    fn pool(db: &MemoryDatabase) -> ConnectionPool<MemoryConnector> {
        ConnectionPool::new(
            Arc::new(MemoryConnector::new(db.clone())),
            ConnectionTarget::new("memory", "memory://test"),
        )
    }

    #[tokio::test]
    async fn test_free_handles_are_reused() {
        let db = MemoryDatabase::new();
        let pool = pool(&db);

        let first = pool.allocate().await.unwrap();
        let first_id = first.id();
        pool.free(first);
        let again = pool.allocate().await.unwrap();

        assert_eq!(again.id(), first_id);
        assert_eq!(db.connections_opened(), 1);
        pool.free(again);
        assert_eq!(pool.free_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_leases_open_new_handles() {
        let db = MemoryDatabase::new();
        let pool = pool(&db);

        let a = pool.allocate().await.unwrap();
        let b = pool.allocate().await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.allocated_count(), 2);
        assert!(matches!(
            pool.assert_idle(),
            Err(StoreError::PoolNotIdle { allocated: 2 })
        ));

        pool.free(a);
        pool.free(b);
        assert!(pool.assert_idle().is_ok());
        assert_eq!(db.open_connections(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let db = MemoryDatabase::new();
        db.fail_next_connects(1);
        let pool = pool(&db);

        assert!(matches!(
            pool.allocate().await,
            Err(StoreError::ConnectionFailed { .. })
        ));
        assert!(pool.is_idle());
        assert!(pool.allocate().await.is_ok());
    }

    #[tokio::test]
    async fn test_leak_hook_fires_past_threshold() {
        let db = MemoryDatabase::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fired);
        let pool = pool(&db)
            .with_leak_threshold(2)
            .with_leak_hook(Arc::new(move |count| {
                seen.store(count, Ordering::SeqCst);
            }));

        let mut held = Vec::new();
        for _ in 0..2 {
            held.push(pool.allocate().await.unwrap());
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        held.push(pool.allocate().await.unwrap());
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        for handle in held {
            pool.free(handle);
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let db = MemoryDatabase::new();
        let pool = pool(&db);

        let leased = pool.allocate().await.unwrap();
        let spare = pool.allocate().await.unwrap();
        pool.free(spare);

        pool.close().await;
        pool.close().await;
        assert!(pool.is_disposed());
        assert_eq!(db.open_connections(), 1);

        // Returned after close: closed rather than kept
        pool.free(leased);
        assert_eq!(db.open_connections(), 0);
        assert!(matches!(
            pool.allocate().await,
            Err(StoreError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_begin_closes_the_connection() {
        let db = MemoryDatabase::new();
        let pool = pool(&db);
        let transaction = Arc::new(AmbientTransaction::new(&TransactionConfig::default()));

        db.fail_next_begins(1);
        assert!(matches!(
            pool.allocate_in(Some(&transaction)).await,
            Err(StoreError::ConnectionFailed { .. })
        ));
        assert_eq!(db.open_connections(), 0);
        assert!(pool.is_idle());

        // A reused handle is closed too, not put back
        let idle = pool.allocate().await.unwrap();
        pool.free(idle);
        db.fail_next_begins(1);
        assert!(pool.allocate_in(Some(&transaction)).await.is_err());
        assert_eq!(db.open_connections(), 0);
        assert_eq!(pool.free_count(), 0);

        let enlisted = pool.allocate_in(Some(&transaction)).await.unwrap();
        assert!(enlisted.is_enlisted());
        assert_eq!(db.open_transactions(), 1);
        pool.free(enlisted);
    }

    #[tokio::test]
    async fn test_abandoned_handles_are_rolled_back_before_idle_ones_are_reused() {
        let db = MemoryDatabase::new();
        let pool = pool(&db);
        let transaction = Arc::new(AmbientTransaction::new(&TransactionConfig::default()));

        let idle = pool.allocate().await.unwrap();
        let first = pool.allocate_in(Some(&transaction)).await.unwrap();
        let second = pool.allocate_in(Some(&transaction)).await.unwrap();
        pool.free(idle);
        pool.free(first);
        pool.free(second);
        transaction.finish();
        assert_eq!(db.open_transactions(), 2);

        for _ in 0..2 {
            let handle = pool.allocate().await.unwrap();
            assert!(!handle.is_enlisted());
            pool.free(handle);
        }
        assert_eq!(db.open_transactions(), 0);
        assert_eq!(pool.free_count(), 3);
    }

    #[tokio::test]
    async fn test_abandoned_rollback_closes_handles_of_a_closed_pool() {
        let db = MemoryDatabase::new();
        let pool = pool(&db);
        let transaction = Arc::new(AmbientTransaction::new(&TransactionConfig::default()));

        let handle = pool.allocate_in(Some(&transaction)).await.unwrap();
        pool.free(handle);
        transaction.finish();
        let detached = pool.detach_enlisted_free(&transaction);
        assert_eq!(detached.len(), 1);
        assert_eq!(pool.free_count(), 0);

        pool.close().await;
        pool.roll_back_abandoned(detached).await;
        assert_eq!(db.open_transactions(), 0);
        assert_eq!(db.open_connections(), 0);
    }

    proptest! {
        #[test]
        fn prop_allocated_count_tracks_allocations_minus_frees(ops in prop::collection::vec(any::<bool>(), 0..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let db = MemoryDatabase::new();
                let pool = pool(&db);
                let mut held = Vec::new();
                let (mut allocations, mut frees) = (0usize, 0usize);

                for allocate in ops {
                    if allocate {
                        held.push(pool.allocate().await.unwrap());
                        allocations += 1;
                    } else if let Some(handle) = held.pop() {
                        pool.free(handle);
                        frees += 1;
                    }
                    prop_assert_eq!(pool.allocated_count(), allocations - frees);
                    prop_assert_eq!(pool.assert_idle().is_ok(), held.is_empty());
                    prop_assert_eq!(
                        pool.allocated_count() + pool.free_count(),
                        db.open_connections()
                    );
                }
                Ok(())
            })?;
        }
    }
}
