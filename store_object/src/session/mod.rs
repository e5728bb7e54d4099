//! Sessions, connection pooling and transaction scopes

mod db_session;
mod pool;
mod pooled;
mod scope;
mod transaction;

pub use db_session::{DbSession, SessionPhase};
pub use pool::{ConnectionPool, LeakHook, PooledHandle};
pub use pooled::PooledConnection;
pub use scope::TranScope;
