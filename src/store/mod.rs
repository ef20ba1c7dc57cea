//! Persistence layer: change cursor and contact memory.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::{InMemoryContactMemory, InMemoryCursorStore};
pub use traits::{ContactMemory, CursorStore};
