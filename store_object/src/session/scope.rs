use std::sync::Arc;

use uuid::Uuid;

use super::db_session::DbSession;
use super::pool::{ConnectionPool, PooledHandle};
use super::transaction::AmbientTransaction;
use crate::backend::{Connector, ProcedureConnection};
use crate::errors::StoreError;

/// A transaction scope. Connections leased from the session while the scope
/// is open join its transaction.
///
/// Finish the scope with [`complete`](Self::complete) to commit. Dropping it
/// without completing rolls the transaction back. Scopes nest: an inner
/// scope joins the outer transaction, and an inner scope dropped without
/// completing dooms it, so the outer `complete` fails.
///
/// ```rust,no_run
/// # use store_object::{DbSession, MemoryConnector, StoreError};
/// # async fn transfer(session: &DbSession<MemoryConnector>) -> Result<(), StoreError> {
/// let scope = session.create_tran_scope();
/// let mut connection = session.get_connection().await?;
/// // ... run procedures on `connection` ...
/// drop(connection);
/// scope.complete().await?;
/// # Ok(())
/// # }
/// ```
#[must_use = "a transaction scope rolls back unless completed"]
pub struct TranScope<C: Connector> {
    session: DbSession<C>,
    transaction: Arc<AmbientTransaction>,
    outermost: bool,
    finished: bool,
}

impl<C: Connector> TranScope<C> {
    pub(crate) fn new(
        session: DbSession<C>,
        transaction: Arc<AmbientTransaction>,
        outermost: bool,
    ) -> Self {
        Self {
            session,
            transaction,
            outermost,
            finished: false,
        }
    }

    /// Whether this scope owns the transaction rather than joining one
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }

    pub fn transaction_id(&self) -> Uuid {
        self.transaction.id()
    }

    /// Whether an inner scope has already made the transaction uncommittable
    pub fn is_doomed(&self) -> bool {
        self.transaction.is_doomed()
    }

    /// Mark the scope successful and close it. The outermost scope commits:
    /// a single enlisted connection commits directly, several commit in two
    /// phases. Every connection leased inside the scope must have been
    /// released first.
    pub async fn complete(mut self) -> Result<(), StoreError> {
        self.finished = true;
        if !self.outermost {
            return Ok(());
        }
        let result = self.commit().await;
        if result.is_err() {
            if let Err(error) = self.roll_back_free_handles().await {
                tracing::warn!(transaction = %self.transaction.id(), error = %error, "rollback after failed commit");
            }
        }
        self.session.end_transaction(&self.transaction);
        match &result {
            Ok(()) => {
                crate::debug_log!(transaction = %self.transaction.id(), "transaction committed");
            }
            Err(error) => {
                tracing::warn!(transaction = %self.transaction.id(), error = %error, "transaction did not commit");
            }
        }
        result
    }

    /// Roll back now instead of when the connections are next leased
    pub async fn rollback(mut self) -> Result<(), StoreError> {
        self.finished = true;
        if !self.outermost {
            self.transaction.doom();
            return Ok(());
        }
        self.transaction.finish();
        let result = self.roll_back_free_handles().await;
        self.session.end_transaction(&self.transaction);
        result
    }

    /// Roll back enlisted handles sitting in the pool. Handles still leased
    /// are rolled back when released.
    async fn roll_back_free_handles(&self) -> Result<(), StoreError> {
        match self.enlisted_pool()? {
            Some(pool) => {
                let handles = pool.take_enlisted_free(&self.transaction);
                rollback_handles(&pool, handles).await
            }
            None => Ok(()),
        }
    }

    /// The pool the transaction enlisted in; `None` if nothing enlisted
    fn enlisted_pool(&self) -> Result<Option<Arc<ConnectionPool<C>>>, StoreError> {
        let Some(pool_id) = self.transaction.pool_id() else {
            return Ok(None);
        };
        match self.session.pool() {
            Some(pool) if pool.id() == pool_id => Ok(Some(pool)),
            _ => Err(StoreError::TransactionAborted(
                "the session was re-activated or disposed while the scope was open".to_string(),
            )),
        }
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let transaction = &self.transaction;
        if transaction.is_doomed() {
            transaction.finish();
            return Err(StoreError::TransactionAborted(
                "an inner scope was dropped without completing".to_string(),
            ));
        }
        if let Err(error) = transaction.check_timeout() {
            transaction.finish();
            return Err(error);
        }

        let pool = match self.enlisted_pool() {
            Ok(Some(pool)) => pool,
            Ok(None) => {
                transaction.finish();
                return Ok(());
            }
            Err(error) => {
                transaction.finish();
                return Err(error);
            }
        };
        let mut handles = match pool.take_enlisted(transaction) {
            Ok(handles) => handles,
            Err(error) => {
                transaction.finish();
                return Err(error);
            }
        };

        let result = match handles.as_mut_slice() {
            [] => Ok(()),
            [single] => single.connection().commit().await,
            several => commit_two_phase(several, transaction.id()).await,
        };
        transaction.finish();
        pool.restore(handles);
        result
    }
}

async fn rollback_handles<C: Connector>(
    pool: &ConnectionPool<C>,
    handles: Vec<PooledHandle<C::Connection>>,
) -> Result<(), StoreError> {
    let mut first_error = None;
    let mut rolled_back = Vec::with_capacity(handles.len());
    for mut handle in handles {
        match handle.connection().rollback().await {
            Ok(()) => rolled_back.push(handle),
            Err(error) => {
                pool.discard(handle);
                first_error.get_or_insert(error);
            }
        }
    }
    pool.restore(rolled_back);
    first_error.map_or(Ok(()), Err)
}

/// Prepare every participant, then commit every participant. A failed
/// prepare rolls all of them back.
async fn commit_two_phase<Conn: ProcedureConnection>(
    handles: &mut [PooledHandle<Conn>],
    transaction_id: Uuid,
) -> Result<(), StoreError> {
    let gids: Vec<String> = (0..handles.len())
        .map(|index| format!("procstore-{}-{}", transaction_id, index))
        .collect();

    for index in 0..handles.len() {
        if let Err(error) = handles[index].connection().prepare(&gids[index]).await {
            tracing::warn!(gid = %gids[index], error = %error, "prepare failed; rolling back all participants");
            for (handle, gid) in handles[..index].iter_mut().zip(&gids) {
                if let Err(error) = handle.connection().rollback_prepared(gid).await {
                    tracing::error!(gid = %gid, error = %error, "failed to roll back prepared transaction");
                }
            }
            for handle in handles[index..].iter_mut() {
                if let Err(error) = handle.connection().rollback().await {
                    tracing::warn!(handle = handle.id(), error = %error, "rollback after failed prepare");
                }
            }
            return Err(error);
        }
    }

    let mut first_error = None;
    for (handle, gid) in handles.iter_mut().zip(&gids) {
        if let Err(error) = handle.connection().commit_prepared(gid).await {
            tracing::error!(gid = %gid, error = %error, "prepared transaction left in doubt");
            first_error.get_or_insert(error);
        }
    }
    first_error.map_or(Ok(()), Err)
}

impl<C: Connector> Drop for TranScope<C> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.outermost {
            tracing::debug!(
                transaction = %self.transaction.id(),
                "transaction scope dropped without completing; rolling back"
            );
            self.transaction.finish();
            self.session.end_transaction(&self.transaction);
            if let Ok(Some(pool)) = self.enlisted_pool() {
                let handles = pool.detach_enlisted_free(&self.transaction);
                ConnectionPool::roll_back_detached(&pool, handles);
            }
        } else {
            self.transaction.doom();
        }
    }
}
