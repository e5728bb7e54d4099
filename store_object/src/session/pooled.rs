use std::sync::Arc;

use super::pool::{ConnectionPool, PooledHandle};
use super::transaction::AmbientTransaction;
use crate::backend::{Connector, ProcedureConnection};
use crate::command::{DataRow, ProcedureCall};
use crate::errors::StoreError;

/// A lease on one pooled handle, returned to the pool when dropped.
///
/// Releasing is idempotent: [`release`](Self::release) may be called any
/// number of times and drop does nothing once the lease is released. A
/// handle whose connection failed at the transport level is discarded
/// instead of being returned.
///
/// A lease taken inside a transaction scope belongs to that scope's
/// transaction. Once the scope ends without committing, calls through the
/// lease fail with [`StoreError::TransactionAborted`] and the handle is
/// rolled back when released.
pub struct PooledConnection<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
    handle: Option<PooledHandle<C::Connection>>,
    broken: bool,
}

impl<C: Connector> PooledConnection<C> {
    /// Lease a handle outside any transaction scope
    pub async fn acquire(pool: Arc<ConnectionPool<C>>) -> Result<Self, StoreError> {
        Self::acquire_in(pool, None).await
    }

    pub(crate) async fn acquire_in(
        pool: Arc<ConnectionPool<C>>,
        transaction: Option<Arc<AmbientTransaction>>,
    ) -> Result<Self, StoreError> {
        let handle = pool.allocate_in(transaction.as_ref()).await?;
        Ok(Self {
            pool,
            handle: Some(handle),
            broken: false,
        })
    }

    pub fn is_held(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle_id(&self) -> Option<u64> {
        self.handle.as_ref().map(PooledHandle::id)
    }

    /// The leased connection; fails once the lease is released or once the
    /// transaction it joined has ended
    pub fn connection(&mut self) -> Result<&mut C::Connection, StoreError> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| StoreError::InvalidState("connection lease was released".to_string()))?;
        if handle.is_stale() {
            return Err(StoreError::TransactionAborted(
                "the transaction scope this connection joined has ended".to_string(),
            ));
        }
        Ok(handle.connection())
    }

    pub async fn query(&mut self, call: &ProcedureCall) -> Result<Vec<DataRow>, StoreError> {
        crate::debug_log!(procedure = call.procedure(), handle = ?self.handle_id(), "query");
        let result = self.connection()?.query(call).await;
        self.observe(&result);
        result
    }

    pub async fn execute(&mut self, call: &mut ProcedureCall) -> Result<(), StoreError> {
        crate::debug_log!(procedure = call.procedure(), handle = ?self.handle_id(), "execute");
        let result = self.connection()?.execute(call).await;
        self.observe(&result);
        result
    }

    pub async fn ping(&mut self) -> Result<(), StoreError> {
        let result = self.connection()?.ping().await;
        self.observe(&result);
        result
    }

    /// Return the handle to its pool
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            if self.broken {
                self.pool.discard(handle);
            } else if handle.is_stale() {
                ConnectionPool::free_abandoned(&self.pool, handle);
            } else {
                self.pool.free(handle);
            }
        }
    }

    fn observe<T>(&mut self, result: &Result<T, StoreError>) {
        if let Err(error) = result {
            if error.is_connection_error() {
                tracing::warn!(handle = ?self.handle_id(), error = %error, "connection failed; it will not be reused");
                self.broken = true;
            }
        }
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.release();
    }
}
