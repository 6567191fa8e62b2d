//! Tree Node Data Structures
//!
//! This module defines the fixed row schema shared by every record stored in a
//! nested-set (MPTT) table, and the `TreeRecord` capability trait that lets any
//! record type answer structural questions from its boundaries alone.
//!
//! # Architecture
//!
//! - **Fixed Row Schema**: identity, parent reference, `left`, `right`,
//!   `tree_id`, `level`
//! - **Opaque Payload**: host-owned data lives in `properties` and is never
//!   touched by the tree index engine
//! - **Boundary Arithmetic**: root/leaf/descendant-count checks need no query
//!
//! # Examples
//!
//! ```rust
//! use mptt_core::models::{TreeNode, TreeRecord};
//! use serde_json::json;
//!
//! let node = TreeNode::new(json!({ "title": "Inbox" }));
//! assert!(node.is_root());
//! assert_eq!(node.descendant_count(), 0);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for tree node inputs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown position '{0}': expected one of first-child, last-child, left, right")]
    InvalidPosition(String),

    #[error("Position '{0}' is not a child position")]
    NotAChildPosition(String),

    #[error("Node '{0}' already has a parent and cannot be inserted as a root")]
    RootHasParent(String),

    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),
}

/// Boundary, tree and depth values of a node.
///
/// `left` and `right` bracket the node's entire subtree in preorder sequence.
/// Values are only ever assigned by the tree index engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeBounds {
    pub left: i64,
    pub right: i64,
    pub tree_id: i64,
    pub level: i64,
}

impl TreeBounds {
    /// Bounds of a freshly inserted root in tree `tree_id`
    pub fn root(tree_id: i64) -> Self {
        Self {
            left: 1,
            right: 2,
            tree_id,
            level: 0,
        }
    }

    /// Span consumed by the node and all of its descendants
    pub fn width(&self) -> i64 {
        self.right - self.left + 1
    }

    /// True when `other` lies inside this interval of the same tree (inclusive)
    pub fn contains(&self, other: &TreeBounds) -> bool {
        self.tree_id == other.tree_id && self.left <= other.left && other.right <= self.right
    }
}

/// A row of the nested-set table.
///
/// # Fields
///
/// - `id`: Unique identifier (UUID unless supplied by the host)
/// - `parent_id`: Parent reference, `None` for roots
/// - `left` / `right`: Preorder boundaries bracketing the subtree
/// - `tree_id`: Identifier shared by every node under one root
/// - `level`: Zero-based depth
/// - `properties`: Host-owned JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Unique identifier
    pub id: String,

    /// Parent node ID (`None` marks a root)
    pub parent_id: Option<String>,

    pub left: i64,
    pub right: i64,
    pub tree_id: i64,
    pub level: i64,

    /// Host-owned payload, opaque to the engine
    #[serde(default)]
    pub properties: Value,
}

impl TreeNode {
    /// Create an unplaced node with a generated UUID.
    ///
    /// Boundaries stay zeroed until the node is inserted through
    /// `TreeIndexEngine`.
    pub fn new(properties: Value) -> Self {
        Self::new_with_id(Uuid::new_v4().to_string(), properties)
    }

    /// Create an unplaced node with a caller-chosen identifier
    pub fn new_with_id(id: impl Into<String>, properties: Value) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            left: 0,
            right: 0,
            tree_id: 0,
            level: 0,
            properties,
        }
    }

    /// Copy of this node with the given placement applied
    pub fn placed(mut self, parent_id: Option<String>, bounds: TreeBounds) -> Self {
        self.parent_id = parent_id;
        self.left = bounds.left;
        self.right = bounds.right;
        self.tree_id = bounds.tree_id;
        self.level = bounds.level;
        self
    }
}

/// Capability interface for records laid out with the nested-set row schema.
///
/// Implementors only expose identity, parent reference and bounds; the
/// structural predicates are derived from those.
pub trait TreeRecord {
    fn node_id(&self) -> &str;

    fn parent_ref(&self) -> Option<&str>;

    fn bounds(&self) -> TreeBounds;

    fn is_root(&self) -> bool {
        self.parent_ref().is_none()
    }

    fn is_child(&self) -> bool {
        !self.is_root()
    }

    fn is_leaf(&self) -> bool {
        let b = self.bounds();
        b.right - b.left == 1
    }

    /// Number of descendants, computed from the boundaries alone
    fn descendant_count(&self) -> i64 {
        let b = self.bounds();
        (b.right - b.left - 1) / 2
    }

    /// True when `other` is a strict descendant of this node
    fn is_ancestor_of<R: TreeRecord + ?Sized>(&self, other: &R) -> bool
    where
        Self: Sized,
    {
        let (mine, theirs) = (self.bounds(), other.bounds());
        mine.tree_id == theirs.tree_id && mine.left < theirs.left && theirs.right < mine.right
    }

    /// True when `other` is a strict ancestor of this node
    fn is_descendant_of<R: TreeRecord + ?Sized>(&self, other: &R) -> bool
    where
        Self: Sized,
    {
        let (mine, theirs) = (self.bounds(), other.bounds());
        mine.tree_id == theirs.tree_id && theirs.left < mine.left && mine.right < theirs.right
    }
}

impl TreeRecord for TreeNode {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn parent_ref(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    fn bounds(&self) -> TreeBounds {
        TreeBounds {
            left: self.left,
            right: self.right,
            tree_id: self.tree_id,
            level: self.level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, parent: Option<&str>, left: i64, right: i64, level: i64) -> TreeNode {
        TreeNode::new_with_id(id, json!({})).placed(
            parent.map(str::to_string),
            TreeBounds {
                left,
                right,
                tree_id: 1,
                level,
            },
        )
    }

    #[test]
    fn test_descendant_count_from_bounds() {
        let root = node("r", None, 1, 10, 0);
        assert_eq!(root.descendant_count(), 4);
        assert!(!root.is_leaf());

        let leaf = node("l", Some("r"), 2, 3, 1);
        assert_eq!(leaf.descendant_count(), 0);
        assert!(leaf.is_leaf());
        assert!(leaf.is_child());
    }

    #[test]
    fn test_ancestor_relations_require_same_tree() {
        let root = node("r", None, 1, 6, 0);
        let child = node("c", Some("r"), 2, 5, 1);
        let mut other_tree = child.clone();
        other_tree.tree_id = 2;

        assert!(root.is_ancestor_of(&child));
        assert!(child.is_descendant_of(&root));
        assert!(!child.is_ancestor_of(&root));
        assert!(!root.is_ancestor_of(&other_tree));
        assert!(!root.is_ancestor_of(&root));
    }

    #[test]
    fn test_serializes_camel_case() {
        let root = node("r", None, 1, 2, 0);
        let value = serde_json::to_value(&root).unwrap();
        assert_eq!(value["treeId"], json!(1));
        assert_eq!(value["parentId"], json!(null));
    }
}
