//! An in-memory list of entities that writes each change through its
//! repository as the change is committed.

use crate::backend::Connector;
use crate::command::ProcedureCall;
use crate::errors::StoreError;
use crate::generic_store::GenericRepository;
use crate::id_type::EntityId;
use crate::traits::{EntityRepository, ProcedureEntity};

/// Ordered entities bound to a repository.
///
/// [`save`](Self::save) and [`remove`](Self::remove) each run inside their
/// own transaction scope. A failed call leaves the list and the entity as
/// they were.
pub struct PersistedList<E: ProcedureEntity, C: Connector> {
    repository: GenericRepository<E, C>,
    items: Vec<E>,
}

impl<E: ProcedureEntity, C: Connector> PersistedList<E, C> {
    pub fn new(repository: GenericRepository<E, C>) -> Self {
        Self::with_items(repository, Vec::new())
    }

    pub fn with_items(repository: GenericRepository<E, C>, items: Vec<E>) -> Self {
        Self { repository, items }
    }

    /// Fill a list from a search procedure
    pub async fn load<F>(
        repository: GenericRepository<E, C>,
        procedure: &str,
        binder: F,
    ) -> Result<Self, StoreError>
    where
        F: FnOnce(&mut ProcedureCall) + Send,
    {
        let items = repository.search(procedure, binder).await?;
        Ok(Self::with_items(repository, items))
    }

    pub fn repository(&self) -> &GenericRepository<E, C> {
        &self.repository
    }

    pub fn push(&mut self, entity: E) {
        self.items.push(entity);
    }

    pub fn get(&self, index: usize) -> Option<&E> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut E> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<E> {
        self.items
    }

    /// Insert the entity at `index` if it has no identity yet, update it
    /// otherwise, then mark it clean
    pub async fn save(&mut self, index: usize) -> Result<(), StoreError> {
        let entity = self
            .items
            .get_mut(index)
            .ok_or_else(|| missing_item(index))?;
        let previous_id = entity.id();

        let scope = self.repository.create_tran_scope();
        let written = if entity.is_persisted() {
            self.repository.update(entity).await
        } else {
            self.repository.insert(entity).await
        };
        let result = match written {
            Ok(()) => scope.complete().await,
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => {
                entity.set_dirty(false);
                Ok(())
            }
            Err(error) => {
                entity.set_id_value(previous_id.value());
                Err(error)
            }
        }
    }

    /// Save every entity that is dirty or not yet persisted; returns how
    /// many were saved. Stops at the first failure.
    pub async fn save_dirty(&mut self) -> Result<usize, StoreError> {
        let pending: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, entity)| entity.is_dirty() || !entity.is_persisted())
            .map(|(index, _)| index)
            .collect();
        for &index in &pending {
            self.save(index).await?;
        }
        Ok(pending.len())
    }

    /// Delete the entity at `index` and take it out of the list, marked
    /// deleted. An entity that was never persisted is only taken out.
    pub async fn remove(&mut self, index: usize) -> Result<E, StoreError> {
        let entity = self.items.get(index).ok_or_else(|| missing_item(index))?;
        if entity.is_persisted() {
            let scope = self.repository.create_tran_scope();
            self.repository.delete(entity).await?;
            scope.complete().await?;
        }
        let mut removed = self.items.remove(index);
        removed.set_deleted(true);
        Ok(removed)
    }
}

fn missing_item(index: usize) -> StoreError {
    StoreError::InvalidState(format!("no list item at index {}", index))
}

impl<'a, E: ProcedureEntity, C: Connector> IntoIterator for &'a PersistedList<E, C> {
    type Item = &'a E;
    type IntoIter = std::slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Persistable;
    use crate::backend::{ConnectionTarget, MemoryConnector, MemoryDatabase};
    use crate::binding::add_param_varchar;
    use crate::command::DataRow;
    use crate::entity::EntityCore;
    use crate::session::DbSession;
    use config::{SessionConfig, TransactionConfig};

    crate::entity_id!(CustomerId);

    #[derive(Debug, Default)]
    struct Customer {
        core: EntityCore<CustomerId>,
        name: Option<String>,
    }

    impl Customer {
        fn named(name: &str) -> Self {
            let mut customer = Customer::default();
            customer.set_name(Some(name));
            customer
        }

        fn set_name(&mut self, value: Option<&str>) {
            self.core.assign_text(&mut self.name, value.map(str::to_string));
        }
    }

    impl Persistable for Customer {
        type Id = CustomerId;

        fn core(&self) -> &EntityCore<CustomerId> {
            &self.core
        }

        fn core_mut(&mut self) -> &mut EntityCore<CustomerId> {
            &mut self.core
        }
    }

    impl ProcedureEntity for Customer {
        type Row = DataRow;

        fn entity_name() -> &'static str {
            "Customer"
        }

        fn create_entity(row: DataRow) -> Result<Self, StoreError> {
            Ok(Customer {
                core: EntityCore::loaded(
                    row.get_id("CustomerId")?,
                    row.get_datetime("CreateDate")?,
                    row.get_datetime("ModifyDate")?,
                ),
                name: row.get_opt_string("Name")?,
            })
        }

        fn add_insert_update_params(&self, call: &mut ProcedureCall) {
            add_param_varchar(call, "@Name", self.name.as_deref());
        }
    }

    fn list(db: &MemoryDatabase) -> PersistedList<Customer, MemoryConnector> {
        let session = DbSession::with_target(
            MemoryConnector::new(db.clone()),
            ConnectionTarget::new("memory", "memory://crm"),
            SessionConfig::default(),
            TransactionConfig::default(),
        );
        session.activate();
        PersistedList::new(GenericRepository::new(session))
    }

    #[tokio::test]
    async fn test_save_inserts_then_updates() {
        let db = MemoryDatabase::new().with_table("Customer");
        let mut list = list(&db);
        list.push(Customer::named("Acme"));
        assert!(list.get(0).unwrap().is_dirty());

        list.save(0).await.unwrap();
        let id = list.get(0).unwrap().id();
        assert!(!id.is_null());
        assert!(!list.get(0).unwrap().is_dirty());

        list.get_mut(0).unwrap().set_name(Some("Acme Corp"));
        list.save(0).await.unwrap();
        assert_eq!(list.get(0).unwrap().id(), id);
        assert_eq!(
            db.committed_row("Customer", id.value())
                .unwrap()
                .get_string("Name")
                .unwrap(),
            "Acme Corp"
        );
        assert_eq!(db.row_count("Customer"), 1);
        list.repository().session().assert_idle().unwrap();
    }

    #[tokio::test]
    async fn test_failed_save_leaves_entity_unchanged() {
        let db = MemoryDatabase::new();
        let mut list = list(&db);
        list.push(Customer::named("Acme"));

        assert!(list.save(0).await.is_err());
        let customer = list.get(0).unwrap();
        assert!(customer.is_dirty());
        assert!(!customer.is_persisted());
        list.repository().session().assert_idle().unwrap();
    }

    #[tokio::test]
    async fn test_save_inside_doomed_scope_fails() {
        let db = MemoryDatabase::new().with_table("Customer");
        let mut list = list(&db);
        list.push(Customer::named("Acme"));

        // The save joins the caller's scope, which an inner rollback doomed
        let session = list.repository().session().clone();
        let outer = session.create_tran_scope();
        session.create_tran_scope().rollback().await.unwrap();
        assert!(outer.is_doomed());

        assert!(list.save(0).await.is_err());
        assert!(!list.get(0).unwrap().is_persisted());
        drop(outer);
        assert_eq!(db.row_count("Customer"), 0);
    }

    #[tokio::test]
    async fn test_remove_deletes_and_marks_deleted() {
        let db = MemoryDatabase::new().with_table("Customer");
        let mut list = list(&db);
        list.push(Customer::named("Acme"));
        list.push(Customer::named("Globex"));
        assert_eq!(list.save_dirty().await.unwrap(), 2);
        assert_eq!(db.row_count("Customer"), 2);

        let removed = list.remove(0).await.unwrap();
        assert!(removed.is_deleted());
        assert_eq!(removed.name.as_deref(), Some("Acme"));
        assert_eq!(list.len(), 1);
        assert_eq!(db.row_count("Customer"), 1);
    }

    #[tokio::test]
    async fn test_remove_unsaved_entity_skips_the_database() {
        let db = MemoryDatabase::new().with_table("Customer");
        let mut list = list(&db);
        list.push(Customer::named("Acme"));

        let removed = list.remove(0).await.unwrap();
        assert!(removed.is_deleted());
        assert!(list.is_empty());
        assert!(db.procedure_calls().is_empty());
    }

    #[tokio::test]
    async fn test_index_out_of_range() {
        let mut list = list(&MemoryDatabase::new());
        assert!(matches!(list.save(3).await, Err(StoreError::InvalidState(_))));
        assert!(matches!(list.remove(0).await, Err(StoreError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_load_from_search() {
        let db = MemoryDatabase::new().with_table("Customer");
        db.seed("Customer", DataRow::new().with("Name", "Acme"));
        db.seed("Customer", DataRow::new().with("Name", "Globex"));
        db.register_procedure("ListCustomers", |ctx, _| {
            Ok(ctx.rows("Customer").into_iter().map(|(_, row)| row).collect())
        });
        let repository = list(&db).repository().clone();

        let list = PersistedList::load(repository, "ListCustomers", |_| {})
            .await
            .unwrap();
        let names: Vec<_> = list.iter().filter_map(|c| c.name.as_deref()).collect();
        assert_eq!(names, ["Acme", "Globex"]);
        assert!(list.iter().all(|c| c.is_persisted() && !c.is_dirty()));
    }
}
