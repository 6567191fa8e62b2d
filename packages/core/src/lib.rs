//! MPTT Core - Nested-Set Tree Index
//!
//! This crate maintains a forest of trees stored as a flat table using the
//! Modified Preorder Tree Traversal (nested set) encoding, and answers tree
//! queries as boundary-range reads.
//!
//! # Architecture
//!
//! - **Nested sets**: every row carries `left`, `right`, `tree_id` and `level`;
//!   a node's subtree is exactly the rows of its tree with boundaries inside
//!   its own
//! - **Ranged write batches**: insertions and moves are planned as a handful of
//!   range shifts applied atomically by the store
//! - **Per-tree locking**: mutations on one tree are serialized, disjoint trees
//!   proceed in parallel; batch preconditions catch writers in other engines
//!   or processes
//! - **libsql/Turso**: embedded SQLite-compatible backend, or an in-memory store
//!
//! # Modules
//!
//! - [`models`] - Row type, bounds, positions
//! - [`db`] - `NodeStore` trait and its backends
//! - [`services`] - Tree index engine, queries, related counts, integrity check
//! - [`config`] - Runtime configuration and store selection
//! - [`logging`] - Optional tracing subscriber setup

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::{open_store, TreeConfig};
pub use models::*;
pub use services::*;
