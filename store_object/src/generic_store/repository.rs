//! Generic repository implementation
//!
//! CRUD for any [`ProcedureEntity`] through its convention procedures, plus
//! `search` and `execute_non_query` for the entity's other procedures.

use super::core::GenericRepository;
use super::cursor::RowCursor;
use crate::backend::Connector;
use crate::binding::{add_param_input_id, add_param_output_id};
use crate::command::{DataRow, FromDataRow, ProcedureCall};
use crate::errors::StoreError;
use crate::traits::{EntityRepository, ProcedureEntity, ProcedureKind};
use async_trait::async_trait;
use type_mapping::SqlValue;

impl<E: ProcedureEntity, C: Connector> GenericRepository<E, C> {
    /// Run a query procedure and materialize every row it returns
    pub async fn search<F>(&self, procedure: &str, binder: F) -> Result<Vec<E>, StoreError>
    where
        F: FnOnce(&mut ProcedureCall) + Send,
    {
        let mut call = ProcedureCall::new(procedure);
        binder(&mut call);
        let rows = self.query(&call).await?;
        Self::create_entities(rows)
    }

    /// Like [`search`](Self::search), but converts rows only as the cursor
    /// is advanced. The raw result set is fetched in full before the cursor
    /// is returned; only row-to-entity conversion is deferred. The cursor
    /// holds its connection lease until it is exhausted or dropped.
    pub async fn search_cursor<F>(
        &self,
        procedure: &str,
        binder: F,
    ) -> Result<RowCursor<E, C>, StoreError>
    where
        F: FnOnce(&mut ProcedureCall) + Send,
    {
        let mut call = ProcedureCall::new(procedure);
        binder(&mut call);
        let mut lease = self.session.get_connection().await?;
        let rows = lease.query(&call).await?;
        Ok(RowCursor::new(rows, lease))
    }

    /// Run a procedure that returns no rows. The returned call carries the
    /// values of any output parameters the binder declared.
    pub async fn execute_non_query<F>(
        &self,
        procedure: &str,
        binder: F,
    ) -> Result<ProcedureCall, StoreError>
    where
        F: FnOnce(&mut ProcedureCall) + Send,
    {
        let mut call = ProcedureCall::new(procedure);
        binder(&mut call);
        self.execute(&mut call).await?;
        Ok(call)
    }

    pub fn create_entities(rows: Vec<DataRow>) -> Result<Vec<E>, StoreError> {
        rows.iter()
            .map(|row| E::Row::from_data_row(row).and_then(E::create_entity))
            .collect()
    }

    async fn query(&self, call: &ProcedureCall) -> Result<Vec<DataRow>, StoreError> {
        let mut lease = self.session.get_connection().await?;
        lease.query(call).await
    }

    async fn execute(&self, call: &mut ProcedureCall) -> Result<(), StoreError> {
        let mut lease = self.session.get_connection().await?;
        lease.execute(call).await
    }

    fn identity_call(kind: ProcedureKind, entity: &E) -> ProcedureCall {
        let mut call = ProcedureCall::new(E::procedure_name(kind));
        add_param_input_id(&mut call, &E::entity_id_param(), entity.id());
        call
    }
}

#[async_trait]
impl<E, C> EntityRepository for GenericRepository<E, C>
where
    E: ProcedureEntity,
    C: Connector,
{
    type Entity = E;

    async fn get(&self, id: E::Id) -> Result<E, StoreError> {
        let procedure = E::procedure_name(ProcedureKind::Get);
        let mut call = ProcedureCall::new(&procedure);
        add_param_input_id(&mut call, &E::entity_id_param(), id);

        let rows = self.query(&call).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::RowNotFound {
                procedure,
                id: id.to_string(),
            })?;
        E::create_entity(E::Row::from_data_row(&row)?)
    }

    async fn insert(&self, entity: &mut E) -> Result<(), StoreError> {
        let procedure = E::procedure_name(ProcedureKind::Insert);
        let id_param = E::entity_id_param();
        let mut call = ProcedureCall::new(&procedure);
        add_param_output_id(&mut call, &id_param);
        entity.add_insert_update_params(&mut call);

        self.execute(&mut call).await?;

        let id = call
            .output_value(&id_param)
            .and_then(SqlValue::as_i32)
            .filter(|id| *id != 0)
            .ok_or_else(|| StoreError::MissingOutput {
                procedure,
                parameter: id_param.clone(),
            })?;
        entity.set_id_value(id);
        crate::debug_log!(entity = E::entity_name(), id, "inserted");
        Ok(())
    }

    async fn update(&self, entity: &E) -> Result<(), StoreError> {
        let mut call = Self::identity_call(ProcedureKind::Update, entity);
        entity.add_insert_update_params(&mut call);
        self.execute(&mut call).await
    }

    async fn delete(&self, entity: &E) -> Result<(), StoreError> {
        let mut call = Self::identity_call(ProcedureKind::Delete, entity);
        self.execute(&mut call).await
    }
}
