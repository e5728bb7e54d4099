use std::marker::PhantomData;

use crate::backend::Connector;
use crate::session::{DbSession, TranScope};
use crate::traits::ProcedureEntity;

/// Generic repository mapping an entity's CRUD to its convention procedures
/// (`Get<Entity>`, `Insert<Entity>`, `Update<Entity>`, `Delete<Entity>`)
pub struct GenericRepository<E: ProcedureEntity, C: Connector> {
    pub(crate) session: DbSession<C>,
    pub(crate) _phantom: PhantomData<fn() -> E>,
}

impl<E: ProcedureEntity, C: Connector> Clone for GenericRepository<E, C> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<E: ProcedureEntity, C: Connector> std::fmt::Debug for GenericRepository<E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericRepository")
            .field("entity", &E::entity_name())
            .field("session", &self.session)
            .finish()
    }
}

impl<E: ProcedureEntity, C: Connector> GenericRepository<E, C> {
    pub fn new(session: DbSession<C>) -> Self {
        Self {
            session,
            _phantom: PhantomData,
        }
    }

    pub fn session(&self) -> &DbSession<C> {
        &self.session
    }

    /// Open a transaction scope on this repository's session; repository
    /// calls made before it completes join its transaction
    pub fn create_tran_scope(&self) -> TranScope<C> {
        self.session.create_tran_scope()
    }
}
