//! Persistence layer: libSQL-backed per-stream state.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ActorState, StateStore};
