//! Generic repository over stored procedures

pub mod core;
pub mod cursor;
pub mod repository;

pub use self::core::GenericRepository;
pub use cursor::RowCursor;
