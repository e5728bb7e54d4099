use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use config::{AppConfig, SessionConfig, TransactionConfig};

use super::pool::{ConnectionPool, LeakHook};
use super::pooled::PooledConnection;
use super::scope::TranScope;
use super::transaction::AmbientTransaction;
use crate::backend::{ConnectionTarget, Connector};
use crate::errors::StoreError;

/// Lifecycle of a [`DbSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Activated,
    Disposed,
}

struct SessionState<C: Connector> {
    phase: SessionPhase,
    pool: Option<Arc<ConnectionPool<C>>>,
    ambient: Option<Arc<AmbientTransaction>>,
    leak_hook: Option<LeakHook>,
}

struct SessionInner<C: Connector> {
    connector: Arc<C>,
    target: ConnectionTarget,
    session_config: SessionConfig,
    transaction_config: TransactionConfig,
    state: Mutex<SessionState<C>>,
}

/// A database session: owns the connection pool of one target and the
/// ambient transaction of its transaction scopes.
///
/// Clones share the same pool and transaction. Call [`activate`](Self::activate)
/// before leasing connections and [`dispose`](Self::dispose) when done.
pub struct DbSession<C: Connector> {
    inner: Arc<SessionInner<C>>,
}

impl<C: Connector> Clone for DbSession<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> DbSession<C> {
    /// Session for the named `[connections.<key>]` entry of `config`
    pub fn new(connector: C, config: &AppConfig, key: &str) -> Result<Self, StoreError> {
        let database = config.connection(key)?;
        Ok(Self::with_target(
            connector,
            ConnectionTarget::from_config(key, database),
            config.session.clone(),
            config.transaction.clone(),
        ))
    }

    pub fn with_target(
        connector: C,
        target: ConnectionTarget,
        session_config: SessionConfig,
        transaction_config: TransactionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                connector: Arc::new(connector),
                target,
                session_config,
                transaction_config,
                state: Mutex::new(SessionState {
                    phase: SessionPhase::Created,
                    pool: None,
                    ambient: None,
                    leak_hook: None,
                }),
            }),
        }
    }

    /// Diagnostic callback for pools created by later activations
    pub fn set_leak_hook(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        self.lock().leak_hook = Some(Arc::new(hook));
    }

    /// Create a fresh pool, replacing any previous one
    pub fn activate(&self) -> &Self {
        let mut state = self.lock();
        let mut pool = ConnectionPool::new(Arc::clone(&self.inner.connector), self.inner.target.clone())
            .with_leak_threshold(self.inner.session_config.leak_threshold);
        if let Some(hook) = &state.leak_hook {
            pool = pool.with_leak_hook(Arc::clone(hook));
        }

        if let Some(previous) = state.pool.replace(Arc::new(pool)) {
            if !previous.is_idle() {
                tracing::warn!(
                    allocated = previous.allocated_count(),
                    connection = %self.inner.target,
                    "session re-activated while connections were still allocated"
                );
            }
        }
        state.phase = SessionPhase::Activated;
        tracing::debug!(connection = %self.inner.target, "session activated");
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    /// Lease a connection; inside a transaction scope it joins the scope's
    /// transaction
    pub async fn get_connection(&self) -> Result<PooledConnection<C>, StoreError> {
        let (pool, ambient) = {
            let state = self.lock();
            let pool = Self::require_pool(&state)?;
            let ambient = state.ambient.clone().filter(|t| !t.is_finished());
            (pool, ambient)
        };
        PooledConnection::acquire_in(pool, ambient).await
    }

    /// Fails while any connection of the current pool is leased
    pub fn assert_idle(&self) -> Result<(), StoreError> {
        let pool = Self::require_pool(&self.lock())?;
        pool.assert_idle()
    }

    /// Open a transaction scope, joining the one already open if any
    pub fn create_tran_scope(&self) -> TranScope<C> {
        let (transaction, outermost) = {
            let mut state = self.lock();
            match state.ambient.as_ref().filter(|t| !t.is_finished()) {
                Some(open) => (Arc::clone(open), false),
                None => {
                    let transaction =
                        Arc::new(AmbientTransaction::new(&self.inner.transaction_config));
                    state.ambient = Some(Arc::clone(&transaction));
                    (transaction, true)
                }
            }
        };
        crate::debug_log!(transaction = %transaction.id(), outermost, "transaction scope opened");
        TranScope::new(self.clone(), transaction, outermost)
    }

    /// Hold two connections at once so the open scope's transaction is
    /// promoted to two-phase commit before any result set is streaming
    pub async fn force_distributed_transaction(&self) -> Result<(), StoreError> {
        let first = self.get_connection().await?;
        let second = self.get_connection().await?;
        tracing::debug!(
            first = ?first.handle_id(),
            second = ?second.handle_id(),
            "forced distributed transaction"
        );
        drop(second);
        drop(first);
        Ok(())
    }

    /// Connection target description without credentials
    pub fn connection_info(&self) -> String {
        self.inner.target.display_string().to_string()
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.inner.target
    }

    /// The current pool, if activated
    pub fn pool(&self) -> Option<Arc<ConnectionPool<C>>> {
        self.lock().pool.clone()
    }

    /// Close the pool. Leases still held close their handles when dropped.
    pub async fn dispose(&self) {
        let pool = {
            let mut state = self.lock();
            state.phase = SessionPhase::Disposed;
            state.pool.take()
        };
        if let Some(pool) = pool {
            if !pool.is_idle() {
                tracing::warn!(
                    allocated = pool.allocated_count(),
                    connection = %self.inner.target,
                    "session disposed while connections were still allocated"
                );
            }
            pool.close().await;
        }
    }

    pub(crate) fn end_transaction(&self, transaction: &Arc<AmbientTransaction>) {
        let mut state = self.lock();
        if state
            .ambient
            .as_ref()
            .is_some_and(|ambient| Arc::ptr_eq(ambient, transaction))
        {
            state.ambient = None;
        }
    }

    fn require_pool(state: &SessionState<C>) -> Result<Arc<ConnectionPool<C>>, StoreError> {
        match (&state.pool, state.phase) {
            (Some(pool), _) => Ok(Arc::clone(pool)),
            (None, SessionPhase::Disposed) => Err(StoreError::InvalidState(
                "session has been disposed".to_string(),
            )),
            (None, _) => Err(StoreError::InvalidState(
                "DbSession::activate() must be called before get_connection()".to_string(),
            )),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState<C>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<C: Connector> fmt::Debug for DbSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSession")
            .field("target", &self.inner.target)
            .field("phase", &self.phase())
            .finish()
    }
}
