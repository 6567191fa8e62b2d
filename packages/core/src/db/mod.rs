//! Database Layer
//!
//! This module holds the persistence side of the nested-set table:
//!
//! - `NodeStore` trait - read/filter, atomic ranged write batches, tree id
//!   allocation and related-row counting
//! - `MemoryStore` - in-process backend (copy-on-write batches)
//! - `TursoStore` / `DatabaseService` - embedded libsql backend (feature `turso`)
//!
//! The tree index engine and the query layer only ever talk to `NodeStore`,
//! so either backend can sit underneath them.

mod memory_store;
pub mod node_store;

#[cfg(feature = "turso")]
mod database;
#[cfg(feature = "turso")]
mod error;
#[cfg(feature = "turso")]
mod turso_store;

pub use memory_store::MemoryStore;
pub use node_store::{
    BoundaryOp, Cmp, NodeOrder, NodeQuery, NodeStore, Predicate, RelationDescriptor, StaleRow,
    WriteBatch,
};

#[cfg(feature = "turso")]
pub use database::{DatabaseService, DEFAULT_BUSY_TIMEOUT_MS};
#[cfg(feature = "turso")]
pub use error::DatabaseError;
#[cfg(feature = "turso")]
pub use turso_store::TursoStore;
