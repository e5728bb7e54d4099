//! Core ProcStore functionality
//!
//! This module contains the main ProcStore struct and its implementation,
//! providing centralized coordination of one database session and the
//! repositories built on it.

use std::any::Any;
use std::collections::HashMap;

use config::AppConfig;
use store_object::backend::{Connector, PgConnector};
use store_object::traits::EntityRepository;
use store_object::DbSession;

use crate::errors::ProcStoreError;

/// Main ProcStore coordinator that owns a database session and a registry
/// of repositories
pub struct ProcStore<C: Connector> {
    session: DbSession<C>,
    repositories: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl ProcStore<PgConnector> {
    /// ProcStore over PostgreSQL for the `[connections.<key>]` entry
    pub fn postgres(config: &AppConfig, key: &str) -> Result<Self, ProcStoreError> {
        Self::new(PgConnector::new(), config, key)
    }
}

impl<C: Connector> ProcStore<C> {
    /// Create a ProcStore with an activated session for the named connection
    pub fn new(connector: C, config: &AppConfig, key: &str) -> Result<Self, ProcStoreError> {
        let session = DbSession::new(connector, config, key)?;
        session.activate();
        tracing::info!(connection = %session.target(), "procstore session ready");
        Ok(Self::with_session(session))
    }

    /// Wrap an existing session; it is used as is, activated or not
    pub fn with_session(session: DbSession<C>) -> Self {
        Self {
            session,
            repositories: HashMap::new(),
        }
    }

    pub fn session(&self) -> &DbSession<C> {
        &self.session
    }

    /// Register a repository under `name`
    pub fn register_repository<R>(&mut self, name: &str, repository: R) -> Result<(), ProcStoreError>
    where
        R: EntityRepository + 'static,
    {
        if self.repositories.contains_key(name) {
            return Err(ProcStoreError::RepositoryAlreadyRegistered(name.to_string()));
        }

        self.repositories.insert(name.to_string(), Box::new(repository));
        crate::debug_log!(repository = name, "registered repository");
        Ok(())
    }

    /// Get a registered repository by name and type
    pub fn get_repository<R>(&self, name: &str) -> Result<&R, ProcStoreError>
    where
        R: EntityRepository + 'static,
    {
        self.repositories
            .get(name)
            .and_then(|repository| repository.downcast_ref::<R>())
            .ok_or_else(|| ProcStoreError::RepositoryNotFound(name.to_string()))
    }

    /// List all registered repository names
    pub fn list_repositories(&self) -> Vec<&String> {
        self.repositories.keys().collect()
    }

    /// Remove a repository by name
    pub fn unregister_repository(&mut self, name: &str) -> Result<(), ProcStoreError> {
        self.repositories
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProcStoreError::RepositoryNotFound(name.to_string()))
    }

    /// Lease one connection, ping it and give it back; the pool must be
    /// idle afterwards
    pub async fn health_check(&self) -> Result<(), ProcStoreError> {
        let mut connection = self.session.get_connection().await?;
        connection.ping().await?;
        connection.release();
        self.session.assert_idle()?;
        Ok(())
    }

    /// Dispose the session, closing its pooled connections
    pub async fn shutdown(&self) {
        self.session.dispose().await;
        tracing::info!(connection = %self.session.target(), "procstore session disposed");
    }
}
