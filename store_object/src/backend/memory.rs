//! In-memory backend.
//!
//! `MemoryDatabase` holds one table of rows per registered entity and answers
//! the conventional `Get<Entity>`, `Insert<Entity>`, `Update<Entity>` and
//! `Delete<Entity>` procedures for it. Other procedures can be registered as
//! closures. Each connection keeps its own transaction write log, applied on
//! commit, so rollback and two-phase commit behave as they would against a
//! server. Identities, like database sequences, are never rolled back.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use type_mapping::SqlValue;

use super::{ConnectionTarget, Connector, ProcedureConnection};
use crate::command::{DataRow, ProcedureCall};
use crate::errors::StoreError;

/// Handler for a registered procedure. Returned rows become the result set;
/// output parameters are written into the call.
pub type ProcedureHandler = Arc<
    dyn Fn(&mut ProcedureContext<'_>, &mut ProcedureCall) -> Result<Vec<DataRow>, StoreError>
        + Send
        + Sync,
>;

const CREATE_DATE: &str = "CreateDate";
const MODIFY_DATE: &str = "ModifyDate";

#[derive(Debug, Clone)]
enum WriteOp {
    Put { table: String, id: i32, row: DataRow },
    Delete { table: String, id: i32 },
}

#[derive(Debug, Default)]
struct MemoryTable {
    next_id: i32,
    rows: BTreeMap<i32, DataRow>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    procedures: HashMap<String, ProcedureHandler>,
    prepared: HashMap<String, Vec<WriteOp>>,
    open_connections: usize,
    connections_opened: usize,
    open_transactions: usize,
    failing_connects: usize,
    failing_begins: usize,
    calls: Vec<String>,
}

impl MemoryState {
    fn apply(&mut self, ops: Vec<WriteOp>) {
        for op in ops {
            match op {
                WriteOp::Put { table, id, row } => {
                    self.tables.entry(table).or_default().rows.insert(id, row);
                }
                WriteOp::Delete { table, id } => {
                    if let Some(t) = self.tables.get_mut(&table) {
                        t.rows.remove(&id);
                    }
                }
            }
        }
    }
}

/// End the connection's open transaction, if any, returning its writes
fn end_transaction(
    transaction: &mut Option<Vec<WriteOp>>,
    state: &mut MemoryState,
) -> Option<Vec<WriteOp>> {
    let ops = transaction.take();
    if ops.is_some() {
        state.open_transactions = state.open_transactions.saturating_sub(1);
    }
    ops
}

fn table_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Procedure name without schema, lowercased
fn procedure_key(procedure: &str) -> String {
    let bare = procedure.rsplit('.').next().unwrap_or(procedure);
    bare.to_ascii_lowercase()
}

/// Shared in-memory database; clones refer to the same data
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the table answering the conventional procedures for `entity`
    pub fn with_table(self, entity: &str) -> Self {
        self.create_table(entity);
        self
    }

    pub fn create_table(&self, entity: &str) {
        self.lock().tables.entry(table_key(entity)).or_default();
    }

    /// Register a custom procedure; it takes precedence over the conventional
    /// procedures of the same name.
    ///
    /// The handler runs while the database lock is held. It must use the
    /// [`ProcedureContext`] it is given and never call back into this
    /// `MemoryDatabase` (`row_count`, `seed` and the like), which would
    /// deadlock.
    pub fn register_procedure<F>(&self, name: &str, handler: F)
    where
        F: Fn(&mut ProcedureContext<'_>, &mut ProcedureCall) -> Result<Vec<DataRow>, StoreError>
            + Send
            + Sync
            + 'static,
    {
        self.lock()
            .procedures
            .insert(procedure_key(name), Arc::new(handler));
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next_connects(&self, count: usize) {
        self.lock().failing_connects = count;
    }

    /// Make the next `count` `begin` calls fail as a dropped connection would
    pub fn fail_next_begins(&self, count: usize) {
        self.lock().failing_begins = count;
    }

    /// Transactions begun on some connection and not yet ended
    pub fn open_transactions(&self) -> usize {
        self.lock().open_transactions
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }

    /// Connections opened over the database's lifetime
    pub fn connections_opened(&self) -> usize {
        self.lock().connections_opened
    }

    /// Committed rows in `entity`'s table
    pub fn row_count(&self, entity: &str) -> usize {
        self.lock()
            .tables
            .get(&table_key(entity))
            .map_or(0, |t| t.rows.len())
    }

    /// A committed row, ignoring uncommitted writes of any connection
    pub fn committed_row(&self, entity: &str, id: i32) -> Option<DataRow> {
        self.lock()
            .tables
            .get(&table_key(entity))
            .and_then(|t| t.rows.get(&id).cloned())
    }

    /// Insert a committed row directly, returning its identity
    pub fn seed(&self, entity: &str, row: DataRow) -> i32 {
        let mut state = self.lock();
        let table = state.tables.entry(table_key(entity)).or_default();
        table.next_id += 1;
        let id = table.next_id;
        let id_column = format!("{}Id", entity);
        let now = Utc::now();
        let mut stored = DataRow::new().with(&id_column, id);
        for (column, value) in row.columns() {
            stored.set(column, value.clone());
        }
        if stored.value(CREATE_DATE).is_none() {
            stored.set(CREATE_DATE, now.into());
        }
        if stored.value(MODIFY_DATE).is_none() {
            stored.set(MODIFY_DATE, now.into());
        }
        table.rows.insert(id, stored);
        id
    }

    /// Two-phase transactions prepared but not yet resolved
    pub fn prepared_transactions(&self) -> usize {
        self.lock().prepared.len()
    }

    /// Names of every procedure called, in call order
    pub fn procedure_calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// View of the database handed to procedure handlers. Reads see committed
/// rows overlaid with the calling connection's uncommitted writes; writes go
/// to that connection's transaction, or straight to the tables outside one.
pub struct ProcedureContext<'a> {
    state: &'a mut MemoryState,
    log: Option<&'a mut Vec<WriteOp>>,
}

impl ProcedureContext<'_> {
    /// Rows of `entity`'s table in identity order
    pub fn rows(&self, entity: &str) -> Vec<(i32, DataRow)> {
        let key = table_key(entity);
        let mut rows = self
            .state
            .tables
            .get(&key)
            .map(|t| t.rows.clone())
            .unwrap_or_default();
        if let Some(log) = self.log.as_deref() {
            for op in log {
                match op {
                    WriteOp::Put { table, id, row } if *table == key => {
                        rows.insert(*id, row.clone());
                    }
                    WriteOp::Delete { table, id } if *table == key => {
                        rows.remove(id);
                    }
                    _ => {}
                }
            }
        }
        rows.into_iter().collect()
    }

    pub fn row(&self, entity: &str, id: i32) -> Option<DataRow> {
        self.rows(entity)
            .into_iter()
            .find_map(|(row_id, row)| (row_id == id).then_some(row))
    }

    pub fn has_table(&self, entity: &str) -> bool {
        self.state.tables.contains_key(&table_key(entity))
    }

    /// Next identity for `entity`; consumed even if the transaction rolls back
    pub fn next_identity(&mut self, entity: &str) -> i32 {
        let table = self.state.tables.entry(table_key(entity)).or_default();
        table.next_id += 1;
        table.next_id
    }

    pub fn put(&mut self, entity: &str, id: i32, row: DataRow) {
        self.write(WriteOp::Put {
            table: table_key(entity),
            id,
            row,
        });
    }

    /// Returns whether a row was there to delete
    pub fn delete(&mut self, entity: &str, id: i32) -> bool {
        let existed = self.row(entity, id).is_some();
        if existed {
            self.write(WriteOp::Delete {
                table: table_key(entity),
                id,
            });
        }
        existed
    }

    fn write(&mut self, op: WriteOp) {
        match self.log.as_deref_mut() {
            Some(log) => log.push(op),
            None => self.state.apply(vec![op]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Convention {
    Get,
    Insert,
    Update,
    Delete,
}

impl Convention {
    fn parse(procedure_key: &str) -> Option<(Self, &str)> {
        [
            ("get", Convention::Get),
            ("insert", Convention::Insert),
            ("update", Convention::Update),
            ("delete", Convention::Delete),
        ]
        .into_iter()
        .find_map(|(prefix, kind)| {
            procedure_key
                .strip_prefix(prefix)
                .filter(|stem| !stem.is_empty())
                .map(|stem| (kind, stem))
        })
    }
}

fn not_found(call: &ProcedureCall) -> StoreError {
    StoreError::ProcedureFailed {
        procedure: call.procedure().to_string(),
        message: "Could not find stored procedure".to_string(),
    }
}

/// First input parameter holds the identity in every conventional procedure
fn identity_input(call: &ProcedureCall) -> Option<(String, Option<i32>)> {
    call.parameters()
        .iter()
        .find(|p| p.direction().is_input())
        .map(|p| (p.name().to_string(), p.value().as_i32()))
}

fn run_convention(
    ctx: &mut ProcedureContext<'_>,
    call: &mut ProcedureCall,
    kind: Convention,
    table: &str,
) -> Result<Vec<DataRow>, StoreError> {
    match kind {
        Convention::Get => {
            let id = identity_input(call).and_then(|(_, id)| id);
            Ok(id.and_then(|id| ctx.row(table, id)).into_iter().collect())
        }
        Convention::Insert => {
            let Some(id_parameter) = call
                .parameters()
                .iter()
                .find(|p| p.direction().is_output())
                .map(|p| p.name().to_string())
            else {
                return Err(StoreError::ProcedureFailed {
                    procedure: call.procedure().to_string(),
                    message: "no output identity parameter".to_string(),
                });
            };

            let id = ctx.next_identity(table);
            let now = Utc::now();
            let mut row = DataRow::new().with(&id_parameter, id);
            for parameter in call.parameters().iter().filter(|p| p.direction().is_input()) {
                row.set(parameter.name(), parameter.value().clone());
            }
            row.set(CREATE_DATE, now.into());
            row.set(MODIFY_DATE, now.into());
            ctx.put(table, id, row);
            call.set_output(&id_parameter, SqlValue::Int(id));
            Ok(Vec::new())
        }
        Convention::Update => {
            let Some((id_parameter, Some(id))) = identity_input(call) else {
                return Ok(Vec::new());
            };
            if let Some(mut row) = ctx.row(table, id) {
                for parameter in call
                    .parameters()
                    .iter()
                    .filter(|p| p.direction().is_input() && p.name() != id_parameter)
                {
                    row.set(parameter.name(), parameter.value().clone());
                }
                row.set(MODIFY_DATE, Utc::now().into());
                ctx.put(table, id, row);
            }
            Ok(Vec::new())
        }
        Convention::Delete => {
            if let Some((_, Some(id))) = identity_input(call) {
                ctx.delete(table, id);
            }
            Ok(Vec::new())
        }
    }
}

/// Opens connections to a [`MemoryDatabase`]
#[derive(Clone, Default)]
pub struct MemoryConnector {
    database: MemoryDatabase,
}

impl MemoryConnector {
    pub fn new(database: MemoryDatabase) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.database
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self, target: &ConnectionTarget) -> Result<Self::Connection, StoreError> {
        let mut state = self.database.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(StoreError::ConnectionFailed {
                target: target.display_string().to_string(),
                message: "connection refused".to_string(),
            });
        }
        state.open_connections += 1;
        state.connections_opened += 1;
        drop(state);

        tracing::debug!(connection = %target, "opened in-memory connection");
        Ok(MemoryConnection {
            database: self.database.clone(),
            transaction: None,
            closed: false,
        })
    }
}

/// One connection to a [`MemoryDatabase`]
pub struct MemoryConnection {
    database: MemoryDatabase,
    transaction: Option<Vec<WriteOp>>,
    closed: bool,
}

impl MemoryConnection {
    /// Whether a transaction is open on this connection
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::InvalidState("connection is closed".to_string()));
        }
        Ok(())
    }

    fn run(&mut self, call: &mut ProcedureCall) -> Result<Vec<DataRow>, StoreError> {
        self.ensure_open()?;
        call.validate()?;

        let key = procedure_key(call.procedure());
        let mut state = self.database.lock();
        state.calls.push(call.procedure().to_string());

        let handler = state.procedures.get(&key).cloned();
        let mut ctx = ProcedureContext {
            state: &mut state,
            log: self.transaction.as_mut(),
        };

        if let Some(handler) = handler {
            return handler(&mut ctx, call);
        }
        match Convention::parse(&key) {
            Some((kind, table)) if ctx.has_table(table) => {
                let table = table.to_string();
                run_convention(&mut ctx, call, kind, &table)
            }
            _ => Err(not_found(call)),
        }
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut state = self.database.lock();
            state.open_connections = state.open_connections.saturating_sub(1);
            end_transaction(&mut self.transaction, &mut state);
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl ProcedureConnection for MemoryConnection {
    async fn query(&mut self, call: &ProcedureCall) -> Result<Vec<DataRow>, StoreError> {
        let mut call = call.clone();
        self.run(&mut call)
    }

    async fn execute(&mut self, call: &mut ProcedureCall) -> Result<(), StoreError> {
        self.run(call).map(|_| ())
    }

    async fn begin(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.transaction.is_some() {
            return Err(StoreError::InvalidState(
                "a transaction is already in progress".to_string(),
            ));
        }
        let mut state = self.database.lock();
        if state.failing_begins > 0 {
            state.failing_begins -= 1;
            return Err(StoreError::ConnectionFailed {
                target: "memory".to_string(),
                message: "connection reset during BEGIN".to_string(),
            });
        }
        state.open_transactions += 1;
        drop(state);
        self.transaction = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut state = self.database.lock();
        if let Some(ops) = end_transaction(&mut self.transaction, &mut state) {
            state.apply(ops);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        end_transaction(&mut self.transaction, &mut self.database.lock());
        Ok(())
    }

    async fn prepare(&mut self, gid: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut state = self.database.lock();
        let ops = end_transaction(&mut self.transaction, &mut state).unwrap_or_default();
        if state.prepared.contains_key(gid) {
            return Err(StoreError::ProcedureFailed {
                procedure: "PREPARE TRANSACTION".to_string(),
                message: format!("transaction identifier \"{}\" is already in use", gid),
            });
        }
        state.prepared.insert(gid.to_string(), ops);
        Ok(())
    }

    async fn commit_prepared(&mut self, gid: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut state = self.database.lock();
        let ops = state
            .prepared
            .remove(gid)
            .ok_or_else(|| StoreError::ProcedureFailed {
                procedure: "COMMIT PREPARED".to_string(),
                message: format!("prepared transaction \"{}\" does not exist", gid),
            })?;
        state.apply(ops);
        Ok(())
    }

    async fn rollback_prepared(&mut self, gid: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.database.lock().prepared.remove(gid);
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        self.ensure_open()
    }

    async fn close(mut self) -> Result<(), StoreError> {
        self.release();
        Ok(())
    }
}
