use std::marker::PhantomData;
use std::vec;

use crate::backend::Connector;
use crate::command::{DataRow, FromDataRow};
use crate::errors::StoreError;
use crate::session::PooledConnection;
use crate::traits::ProcedureEntity;

/// Forward-only cursor over a procedure's result rows, converting each row
/// to an entity as it is reached.
///
/// The reader is the buffered result set, as backends return rows in full;
/// entities are built one row at a time. The cursor owns the reader and the
/// connection lease. Both are released when the cursor is exhausted, closed
/// or dropped, reader first.
pub struct RowCursor<E: ProcedureEntity, C: Connector> {
    reader: Option<vec::IntoIter<DataRow>>,
    lease: Option<PooledConnection<C>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: ProcedureEntity, C: Connector> RowCursor<E, C> {
    pub(crate) fn new(rows: Vec<DataRow>, lease: PooledConnection<C>) -> Self {
        Self {
            reader: Some(rows.into_iter()),
            lease: Some(lease),
            _entity: PhantomData,
        }
    }

    /// Whether the cursor still holds its connection lease
    pub fn is_open(&self) -> bool {
        self.lease.is_some()
    }

    /// Rows not yet read
    pub fn remaining(&self) -> usize {
        self.reader.as_ref().map_or(0, |reader| reader.len())
    }

    pub fn close(&mut self) {
        self.reader = None;
        if let Some(mut lease) = self.lease.take() {
            lease.release();
        }
    }
}

impl<E: ProcedureEntity, C: Connector> Iterator for RowCursor<E, C> {
    type Item = Result<E, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.reader.as_mut()?.next();
        match row {
            Some(row) => Some(E::Row::from_data_row(&row).and_then(E::create_entity)),
            None => {
                self.close();
                None
            }
        }
    }
}

impl<E: ProcedureEntity, C: Connector> Drop for RowCursor<E, C> {
    fn drop(&mut self) {
        self.close();
    }
}
