//! NodeStore Trait - Persistence Abstraction Layer
//!
//! This module defines the `NodeStore` trait that the tree index engine and the
//! query layer consume. The trait enables multiple backend implementations
//! (in-memory, Turso/libsql) without changing any tree algorithm.
//!
//! # Architecture
//!
//! - **Abstraction Point**: Between `TreeIndexEngine`/`QueryService` and storage
//! - **Declarative Reads**: `NodeQuery` carries predicates and an ordering,
//!   backends translate it (SQL `WHERE`/`ORDER BY`, or an in-memory filter)
//! - **Ranged Writes**: `WriteBatch` is an ordered list of `BoundaryOp`s that
//!   each touch a contiguous boundary range; the whole batch is atomic
//!
//! # Design Decisions
//!
//! 1. **Async-First**: All methods are async so embedded and networked backends
//!    share one interface
//! 2. **Error Handling**: Uses `anyhow::Result` for flexible error context;
//!    the service layer wraps failures into `TreeError::StorageFailure`
//! 3. **Atomicity**: `apply_batch` is all-or-nothing. Readers never observe a
//!    partially applied batch
//!
//! # Examples
//!
//! ```rust
//! use mptt_core::db::{MemoryStore, NodeStore, NodeQuery, NodeOrder, Predicate};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::new());
//! let roots = store
//!     .query_nodes(&NodeQuery::new(NodeOrder::Preorder).with(Predicate::Level(0)))
//!     .await?;
//! assert!(roots.is_empty());
//! # Ok(())
//! # }
//! ```

use crate::models::{TreeBounds, TreeNode, TreeRecord, ValidationError};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Comparison operator for boundary predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    pub fn sql(&self) -> &'static str {
        match self {
            Cmp::Eq => "=",
            Cmp::Lt => "<",
            Cmp::Le => "<=",
            Cmp::Gt => ">",
            Cmp::Ge => ">=",
        }
    }

    pub fn eval(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            Cmp::Eq => lhs == rhs,
            Cmp::Lt => lhs < rhs,
            Cmp::Le => lhs <= rhs,
            Cmp::Gt => lhs > rhs,
            Cmp::Ge => lhs >= rhs,
        }
    }
}

/// A single conjunctive filter term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    TreeId(i64),
    Level(i64),
    Left(Cmp, i64),
    Right(Cmp, i64),
    /// `right = left + 1`
    Leaf,
    ExcludeId(String),
}

impl Predicate {
    pub fn matches(&self, node: &TreeNode) -> bool {
        match self {
            Predicate::TreeId(tree_id) => node.tree_id == *tree_id,
            Predicate::Level(level) => node.level == *level,
            Predicate::Left(cmp, value) => cmp.eval(node.left, *value),
            Predicate::Right(cmp, value) => cmp.eval(node.right, *value),
            Predicate::Leaf => node.right == node.left + 1,
            Predicate::ExcludeId(id) => node.id != *id,
        }
    }
}

/// Result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeOrder {
    /// Ascending `tree_id`, then ascending `left` (global preorder of the forest)
    #[default]
    Preorder,
    /// Descending `tree_id`, then descending `left`
    ReversePreorder,
}

/// Filtered, ordered read over the node table.
///
/// All predicates are AND-ed; an empty predicate list selects every row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeQuery {
    pub predicates: Vec<Predicate>,
    pub order: NodeOrder,
    pub limit: Option<usize>,
}

impl NodeQuery {
    pub fn new(order: NodeOrder) -> Self {
        Self {
            predicates: Vec::new(),
            order,
            limit: None,
        }
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, node: &TreeNode) -> bool {
        self.predicates.iter().all(|p| p.matches(node))
    }
}

/// One ranged write inside a `WriteBatch`.
///
/// Operations are applied in order. Boundary shifts only ever touch rows with
/// positive boundaries, so a subtree taken out with `Capture` is immune to the
/// gap-closing and gap-opening shifts until `Relocate` puts it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoundaryOp {
    /// Abort the batch with `StaleRow` unless row `id` still holds exactly
    /// `bounds` and `parent_id`
    Expect {
        id: String,
        bounds: TreeBounds,
        parent_id: Option<String>,
    },

    /// Insert a fully placed row
    Insert(TreeNode),

    /// Set aside every row of `tree_id` inside `[left, right]`
    Capture { tree_id: i64, left: i64, right: i64 },

    /// `left += delta` for rows of `tree_id` with `left >= from`
    ShiftLeft { tree_id: i64, from: i64, delta: i64 },

    /// `right += delta` for rows of `tree_id` with `right >= from`
    ShiftRight { tree_id: i64, from: i64, delta: i64 },

    /// Restore the rows captured from `tree_id`, moved by `delta_pos`,
    /// re-levelled by `delta_level` and reassigned to `new_tree_id`
    Relocate {
        tree_id: i64,
        delta_pos: i64,
        delta_level: i64,
        new_tree_id: i64,
    },

    /// Rewrite a single row's parent reference
    SetParent {
        id: String,
        parent_id: Option<String>,
    },

    /// Overwrite a single row's bounds (used by rebuild)
    Assign { id: String, bounds: TreeBounds },
}

impl BoundaryOp {
    /// Precondition pinning `node` to the state it was read in
    pub fn expect(node: &TreeNode) -> Self {
        Self::Expect {
            id: node.id.clone(),
            bounds: node.bounds(),
            parent_id: node.parent_id.clone(),
        }
    }
}

/// A batch precondition failed: another writer changed the row after the
/// batch was planned. Nothing of the batch was written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Node '{id}' changed after the batch was planned")]
pub struct StaleRow {
    pub id: String,
}

/// Ordered set of boundary operations applied atomically
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub ops: Vec<BoundaryOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: BoundaryOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// External relation whose `foreign_key` column references node ids.
///
/// Both names are restricted to plain SQL identifiers so they can be
/// interpolated into statements safely.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationDescriptor {
    table: String,
    foreign_key: String,
}

impl RelationDescriptor {
    pub fn new(
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let table = table.into();
        let foreign_key = foreign_key.into();
        for name in [&table, &foreign_key] {
            if !is_identifier(name) {
                return Err(ValidationError::InvalidIdentifier(name.clone()));
            }
        }
        Ok(Self { table, foreign_key })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Abstraction layer for nested-set persistence
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so a single store can be shared by
/// concurrent engine and query calls.
///
/// # Method Categories
///
/// - **Reads**: `get_node`, `query_nodes`
/// - **Writes**: `apply_batch` (atomic)
/// - **Allocation**: `allocate_tree_id` (monotonic counter)
/// - **Aggregation**: `count_related`
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Get node by ID
    ///
    /// - `Ok(Some(node))` if the node exists
    /// - `Ok(None)` if it doesn't (not an error)
    async fn get_node(&self, id: &str) -> Result<Option<TreeNode>>;

    /// Read every row matching `query`, in the requested order
    async fn query_nodes(&self, query: &NodeQuery) -> Result<Vec<TreeNode>>;

    /// Apply all operations of `batch` atomically
    ///
    /// # Errors
    ///
    /// Returns error if any operation fails; in that case none of the batch
    /// is visible afterwards. A failed `Expect` surfaces as a `StaleRow`
    /// that callers can `downcast_ref`. Backends check `Expect` under the
    /// same write lock as the rest of the batch.
    async fn apply_batch(&self, batch: WriteBatch) -> Result<()>;

    /// Allocate a fresh tree id.
    ///
    /// Ids are strictly increasing and always greater than every `tree_id`
    /// currently stored, so an empty forest starts at 1.
    async fn allocate_tree_id(&self) -> Result<i64>;

    /// Count rows of `relation` referencing `node`.
    ///
    /// With `cumulative` the count covers every node whose bounds fall within
    /// `[node.left, node.right]` of the node's tree.
    async fn count_related(
        &self,
        relation: &RelationDescriptor,
        node: &TreeNode,
        cumulative: bool,
    ) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_descriptor_rejects_non_identifiers() {
        assert!(RelationDescriptor::new("comments", "node_id").is_ok());
        assert!(RelationDescriptor::new("_t1", "fk_2").is_ok());
        assert_eq!(
            RelationDescriptor::new("comments; DROP TABLE x", "node_id").unwrap_err(),
            ValidationError::InvalidIdentifier("comments; DROP TABLE x".to_string())
        );
        assert!(RelationDescriptor::new("comments", "1node").is_err());
        assert!(RelationDescriptor::new("", "node_id").is_err());
    }

    #[test]
    fn test_expect_pins_bounds_and_parent() {
        let node = TreeNode::new_with_id("a", serde_json::json!({})).placed(
            Some("r".to_string()),
            TreeBounds {
                left: 2,
                right: 3,
                tree_id: 1,
                level: 1,
            },
        );
        assert_eq!(
            BoundaryOp::expect(&node),
            BoundaryOp::Expect {
                id: "a".to_string(),
                bounds: node.bounds(),
                parent_id: Some("r".to_string()),
            }
        );
    }

    #[test]
    fn test_cmp_eval_and_sql() {
        assert!(Cmp::Ge.eval(3, 3));
        assert!(!Cmp::Gt.eval(3, 3));
        assert_eq!(Cmp::Le.sql(), "<=");
    }
}
