//! Traits for database operations
//!
//! This module contains the traits that define the interface between
//! entities, repositories and the procedures behind them.

pub mod core;
pub mod procedure_entity;

// Re-export all public items for convenience
pub use self::core::EntityRepository;
pub use procedure_entity::{ProcedureEntity, ProcedureKind};
