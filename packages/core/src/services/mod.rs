//! Tree Services
//!
//! This module contains the nested-set logic on top of the `NodeStore`:
//!
//! - `TreeIndexEngine` - Insertions, moves and rebuilds that keep the
//!   boundaries consistent
//! - `QueryService` - Ancestor/descendant/sibling queries as boundary ranges
//! - `RelatedCountAggregator` - Per-node and subtree counts of external rows
//! - `check_integrity` - Independent verification of a stored forest
//!
//! Services never hold rows across calls; every operation re-reads what it
//! needs from the store.

pub mod error;
pub mod integrity;
pub mod query_service;
pub mod related_count;
pub mod tree_index;
mod tree_locks;

pub use error::{TreeError, TreeResult};
pub use integrity::{check_integrity, check_nodes, IntegrityReport};
pub use query_service::{QueryService, TreeQuery};
pub use related_count::{RelatedCount, RelatedCountAggregator};
pub use tree_index::TreeIndexEngine;
pub use tree_locks::{TreeGuard, TreeLockManager};
