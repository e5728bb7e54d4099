//! Trait definitions
//!
//! This module defines the CRUD contract shared by entity repositories.

use crate::entity::Persistable;
use crate::errors::StoreError;
use async_trait::async_trait;

/// Create/read/update/delete for one entity type.
///
/// Every call leases exactly one pooled connection and releases it before
/// returning, on success and on failure alike.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// The entity type this repository persists
    type Entity: Persistable + Send + Sync;

    /// Load one entity; fails with [`StoreError::RowNotFound`] when no row
    /// comes back
    async fn get(
        &self,
        id: <Self::Entity as Persistable>::Id,
    ) -> Result<Self::Entity, StoreError>;

    /// Insert a new row and write the generated identity onto `entity`
    async fn insert(&self, entity: &mut Self::Entity) -> Result<(), StoreError>;

    /// Update the row identified by the entity's identity
    async fn update(&self, entity: &Self::Entity) -> Result<(), StoreError>;

    /// Delete the row identified by the entity's identity
    async fn delete(&self, entity: &Self::Entity) -> Result<(), StoreError>;
}
