//! Query Service - Tree Queries as Boundary Predicates
//!
//! This module translates semantic tree queries into `NodeQuery` filters over
//! the nested-set columns. No query walks parent references; every result set
//! is one (or, for `family`, two) range reads against the node store.
//!
//! # Query Pattern Examples
//!
//! - Ancestors: `tree_id = t AND lft < l AND rgt > r ORDER BY lft`
//! - Children: `tree_id = t AND level = v + 1 AND lft > l AND rgt < r`
//! - Next sibling: `tree_id = t AND level = v AND lft = r + 1`
//! - Roots: `level = 0 ORDER BY tree_id`
//!
//! # Laziness
//!
//! Multi-row queries return a `TreeQuery`. Building one performs no I/O; each
//! `fetch` re-runs the reads, so a `TreeQuery` can be kept and re-executed
//! after the tree changes.
//!
//! # Examples
//!
//! ```rust
//! use mptt_core::db::MemoryStore;
//! use mptt_core::models::{Position, TreeNode};
//! use mptt_core::services::TreeIndexEngine;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = TreeIndexEngine::new(Arc::new(MemoryStore::new()));
//! let root = engine.insert_root(TreeNode::new(json!({}))).await?;
//! let child = engine
//!     .insert_child(TreeNode::new(json!({})), &root.id, Position::LastChild)
//!     .await?;
//!
//! let queries = engine.queries();
//! let ancestors = queries.ancestors(&child, false).fetch().await?;
//! assert_eq!(ancestors[0].id, root.id);
//! # Ok(())
//! # }
//! ```

use crate::db::{Cmp, NodeOrder, NodeQuery, NodeStore, Predicate};
use crate::models::{TreeNode, TreeRecord};
use crate::services::error::{TreeError, TreeResult};
use std::sync::Arc;

/// Lazily evaluated, restartable tree query
#[derive(Clone)]
pub struct TreeQuery {
    store: Option<Arc<dyn NodeStore>>,
    parts: Vec<NodeQuery>,
}

impl std::fmt::Debug for TreeQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeQuery")
            .field("parts", &self.parts)
            .finish_non_exhaustive()
    }
}

impl TreeQuery {
    fn new(store: Arc<dyn NodeStore>, query: NodeQuery) -> Self {
        Self {
            store: Some(store),
            parts: vec![query],
        }
    }

    /// A query known to match nothing; never touches the store
    pub fn empty() -> Self {
        Self {
            store: None,
            parts: Vec::new(),
        }
    }

    fn chain(mut self, next: TreeQuery) -> Self {
        if self.store.is_none() {
            return next;
        }
        self.parts.extend(next.parts);
        self
    }

    /// The store reads this query will issue, in order
    pub fn parts(&self) -> &[NodeQuery] {
        &self.parts
    }

    /// Execute and collect the ordered result
    pub async fn fetch(&self) -> TreeResult<Vec<TreeNode>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        let mut nodes = Vec::new();
        for part in &self.parts {
            nodes.extend(store.query_nodes(part).await?);
        }
        Ok(nodes)
    }

    /// First row of the ordered result
    pub async fn first(&self) -> TreeResult<Option<TreeNode>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        for part in &self.parts {
            let mut limited = part.clone();
            limited.limit = Some(1);
            if let Some(node) = store.query_nodes(&limited).await?.into_iter().next() {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    pub async fn count(&self) -> TreeResult<usize> {
        Ok(self.fetch().await?.len())
    }

    pub async fn ids(&self) -> TreeResult<Vec<String>> {
        Ok(self.fetch().await?.into_iter().map(|n| n.id).collect())
    }
}

/// Read-only tree queries over a node store
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn NodeStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    fn query(&self, query: NodeQuery) -> TreeQuery {
        TreeQuery::new(self.store.clone(), query)
    }

    fn in_tree(node: &impl TreeRecord, order: NodeOrder) -> NodeQuery {
        NodeQuery::new(order).with(Predicate::TreeId(node.bounds().tree_id))
    }

    pub async fn get_node(&self, id: &str) -> TreeResult<Option<TreeNode>> {
        Ok(self.store.get_node(id).await?)
    }

    /// Every node of the forest in global preorder (`tree_id`, then `left`)
    pub fn all_nodes(&self) -> TreeQuery {
        self.query(NodeQuery::new(NodeOrder::Preorder))
    }

    /// Strict ancestors; root first unless `ascending` is set
    pub fn ancestors(&self, node: &impl TreeRecord, ascending: bool) -> TreeQuery {
        let b = node.bounds();
        let order = if ascending {
            NodeOrder::ReversePreorder
        } else {
            NodeOrder::Preorder
        };
        self.query(
            Self::in_tree(node, order)
                .with(Predicate::Left(Cmp::Lt, b.left))
                .with(Predicate::Right(Cmp::Gt, b.right)),
        )
    }

    pub fn children(&self, node: &impl TreeRecord) -> TreeQuery {
        if node.is_leaf() {
            return TreeQuery::empty();
        }
        let b = node.bounds();
        self.query(
            Self::in_tree(node, NodeOrder::Preorder)
                .with(Predicate::Level(b.level + 1))
                .with(Predicate::Left(Cmp::Gt, b.left))
                .with(Predicate::Right(Cmp::Lt, b.right)),
        )
    }

    pub fn descendants(&self, node: &impl TreeRecord, include_self: bool) -> TreeQuery {
        let b = node.bounds();
        let (lower, upper) = if include_self {
            (Cmp::Ge, Cmp::Le)
        } else {
            if node.is_leaf() {
                return TreeQuery::empty();
            }
            (Cmp::Gt, Cmp::Lt)
        };
        self.query(
            Self::in_tree(node, NodeOrder::Preorder)
                .with(Predicate::Left(lower, b.left))
                .with(Predicate::Right(upper, b.right)),
        )
    }

    /// Number of strict descendants, from the boundaries alone
    pub fn descendant_count(&self, node: &impl TreeRecord) -> i64 {
        node.descendant_count()
    }

    /// Descendants without children of their own
    pub fn leaf_nodes(&self, node: &impl TreeRecord, include_self: bool) -> TreeQuery {
        if node.is_leaf() {
            return if include_self {
                self.descendants(node, true)
            } else {
                TreeQuery::empty()
            };
        }
        let b = node.bounds();
        self.query(
            Self::in_tree(node, NodeOrder::Preorder)
                .with(Predicate::Left(Cmp::Gt, b.left))
                .with(Predicate::Right(Cmp::Lt, b.right))
                .with(Predicate::Leaf),
        )
    }

    /// Ancestors, the node itself and its descendants, in preorder
    pub fn family(&self, node: &impl TreeRecord) -> TreeQuery {
        self.ancestors(node, false).chain(self.descendants(node, true))
    }

    /// Root of the node's tree
    pub async fn get_root(&self, node: &impl TreeRecord) -> TreeResult<TreeNode> {
        self.query(Self::in_tree(node, NodeOrder::Preorder).with(Predicate::Level(0)))
            .first()
            .await?
            .ok_or_else(|| {
                TreeError::not_found(format!("root of tree {}", node.bounds().tree_id))
            })
    }

    /// Nodes sharing `node`'s parent.
    ///
    /// For a root these are all other roots of the forest, ordered by tree
    /// id. Otherwise the parent's boundaries are read first, which is why
    /// this query is async.
    pub async fn siblings(
        &self,
        node: &impl TreeRecord,
        include_self: bool,
    ) -> TreeResult<TreeQuery> {
        let b = node.bounds();
        let mut query = if node.is_root() || b.level == 0 {
            NodeQuery::new(NodeOrder::Preorder).with(Predicate::Level(0))
        } else {
            let parent = self
                .query(
                    Self::in_tree(node, NodeOrder::Preorder)
                        .with(Predicate::Level(b.level - 1))
                        .with(Predicate::Left(Cmp::Lt, b.left))
                        .with(Predicate::Right(Cmp::Gt, b.right)),
                )
                .first()
                .await?
                .ok_or_else(|| TreeError::not_found(format!("parent of '{}'", node.node_id())))?;
            Self::in_tree(node, NodeOrder::Preorder)
                .with(Predicate::Level(b.level))
                .with(Predicate::Left(Cmp::Gt, parent.left))
                .with(Predicate::Right(Cmp::Lt, parent.right))
        };
        if !include_self {
            query = query.with(Predicate::ExcludeId(node.node_id().to_string()));
        }
        Ok(self.query(query))
    }

    pub async fn next_sibling(&self, node: &impl TreeRecord) -> TreeResult<Option<TreeNode>> {
        let b = node.bounds();
        self.query(
            Self::in_tree(node, NodeOrder::Preorder)
                .with(Predicate::Level(b.level))
                .with(Predicate::Left(Cmp::Eq, b.right + 1)),
        )
        .first()
        .await
    }

    pub async fn previous_sibling(&self, node: &impl TreeRecord) -> TreeResult<Option<TreeNode>> {
        let b = node.bounds();
        self.query(
            Self::in_tree(node, NodeOrder::Preorder)
                .with(Predicate::Level(b.level))
                .with(Predicate::Right(Cmp::Eq, b.left - 1)),
        )
        .first()
        .await
    }

    pub fn is_root(&self, node: &impl TreeRecord) -> bool {
        node.is_root()
    }

    pub fn is_child(&self, node: &impl TreeRecord) -> bool {
        node.is_child()
    }

    pub fn is_leaf(&self, node: &impl TreeRecord) -> bool {
        node.is_leaf()
    }

    /// Roots of every tree, ordered by tree id
    pub fn root_nodes(&self) -> TreeQuery {
        self.query(NodeQuery::new(NodeOrder::Preorder).with(Predicate::Level(0)))
    }
}

#[cfg(test)]
mod query_service_test;
