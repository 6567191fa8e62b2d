//! MemoryStore - In-Process NodeStore Implementation
//!
//! Keeps the node table in a `BTreeMap` behind a tokio `RwLock`. Write batches
//! are applied to a copy of the table which replaces the live one only when
//! every operation succeeded, so readers either see the state before a batch
//! or after it.
//!
//! External relations used by the related-count aggregator are kept as plain
//! lists of referenced node ids per `RelationDescriptor`.

use crate::db::node_store::{
    BoundaryOp, NodeOrder, NodeQuery, NodeStore, RelationDescriptor, StaleRow, WriteBatch,
};
use crate::models::{TreeNode, TreeRecord};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<String, TreeNode>,
    tree_counter: i64,
    relations: HashMap<RelationDescriptor, Vec<String>>,
}

/// In-memory `NodeStore`
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,

    #[cfg(test)]
    fail_next_batch: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `nodes`, such as a snapshot of some trees of
    /// another store
    pub fn with_nodes(nodes: impl IntoIterator<Item = TreeNode>) -> Self {
        let rows = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        Self {
            state: RwLock::new(MemoryState {
                rows,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Record one row of `relation` pointing at `node_id`
    pub async fn add_related(&self, relation: &RelationDescriptor, node_id: impl Into<String>) {
        let mut state = self.state.write().await;
        state
            .relations
            .entry(relation.clone())
            .or_default()
            .push(node_id.into());
    }

    /// Number of stored rows
    pub async fn len(&self) -> usize {
        self.state.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.rows.is_empty()
    }

    /// Make the next `apply_batch` fail after applying its operations to the
    /// scratch copy, to exercise rollback
    #[cfg(test)]
    pub(crate) fn fail_next_batch(&self) {
        self.fail_next_batch
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn apply_op(rows: &mut BTreeMap<String, TreeNode>, op: BoundaryOp) -> Result<()> {
        match op {
            BoundaryOp::Expect {
                id,
                bounds,
                parent_id,
            } => match rows.get(&id) {
                Some(row) if row.bounds() == bounds && row.parent_id == parent_id => {}
                _ => return Err(StaleRow { id }.into()),
            },
            BoundaryOp::Insert(node) => {
                if rows.contains_key(&node.id) {
                    bail!("Node '{}' already exists", node.id);
                }
                rows.insert(node.id.clone(), node);
            }
            BoundaryOp::Capture {
                tree_id,
                left,
                right,
            } => {
                for row in rows.values_mut() {
                    let inside = row.left >= left && row.right <= right;
                    if row.tree_id == tree_id && inside && row.left > 0 {
                        row.left = -row.left;
                        row.right = -row.right;
                    }
                }
            }
            BoundaryOp::ShiftLeft {
                tree_id,
                from,
                delta,
            } => {
                for row in rows.values_mut() {
                    if row.tree_id == tree_id && row.left > 0 && row.left >= from {
                        row.left += delta;
                    }
                }
            }
            BoundaryOp::ShiftRight {
                tree_id,
                from,
                delta,
            } => {
                for row in rows.values_mut() {
                    if row.tree_id == tree_id && row.right > 0 && row.right >= from {
                        row.right += delta;
                    }
                }
            }
            BoundaryOp::Relocate {
                tree_id,
                delta_pos,
                delta_level,
                new_tree_id,
            } => {
                for row in rows.values_mut() {
                    if row.tree_id == tree_id && row.left < 0 {
                        row.left = -row.left + delta_pos;
                        row.right = -row.right + delta_pos;
                        row.level += delta_level;
                        row.tree_id = new_tree_id;
                    }
                }
            }
            BoundaryOp::SetParent { id, parent_id } => match rows.get_mut(&id) {
                Some(row) => row.parent_id = parent_id,
                None => bail!("Cannot set parent of missing node '{}'", id),
            },
            BoundaryOp::Assign { id, bounds } => match rows.get_mut(&id) {
                Some(row) => {
                    row.left = bounds.left;
                    row.right = bounds.right;
                    row.tree_id = bounds.tree_id;
                    row.level = bounds.level;
                }
                None => bail!("Cannot assign bounds of missing node '{}'", id),
            },
        }
        Ok(())
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn get_node(&self, id: &str) -> Result<Option<TreeNode>> {
        Ok(self.state.read().await.rows.get(id).cloned())
    }

    async fn query_nodes(&self, query: &NodeQuery) -> Result<Vec<TreeNode>> {
        let state = self.state.read().await;
        let mut nodes: Vec<TreeNode> = state
            .rows
            .values()
            .filter(|node| query.matches(node))
            .cloned()
            .collect();

        match query.order {
            NodeOrder::Preorder => nodes.sort_by_key(|n| (n.tree_id, n.left)),
            NodeOrder::ReversePreorder => {
                nodes.sort_by_key(|n| std::cmp::Reverse((n.tree_id, n.left)))
            }
        }
        if let Some(limit) = query.limit {
            nodes.truncate(limit);
        }
        Ok(nodes)
    }

    async fn apply_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut state = self.state.write().await;
        let mut scratch = state.rows.clone();
        for op in batch.ops {
            Self::apply_op(&mut scratch, op)?;
        }

        #[cfg(test)]
        if self
            .fail_next_batch
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            bail!("Injected batch failure");
        }

        state.rows = scratch;
        Ok(())
    }

    async fn allocate_tree_id(&self) -> Result<i64> {
        let mut state = self.state.write().await;
        let stored_max = state.rows.values().map(|n| n.tree_id).max().unwrap_or(0);
        state.tree_counter = state.tree_counter.max(stored_max) + 1;
        Ok(state.tree_counter)
    }

    async fn count_related(
        &self,
        relation: &RelationDescriptor,
        node: &TreeNode,
        cumulative: bool,
    ) -> Result<i64> {
        let state = self.state.read().await;
        let Some(referenced) = state.relations.get(relation) else {
            return Ok(0);
        };

        let count = if cumulative {
            referenced
                .iter()
                .filter_map(|id| state.rows.get(id))
                .filter(|row| {
                    row.tree_id == node.tree_id && row.left >= node.left && row.right <= node.right
                })
                .count()
        } else {
            referenced.iter().filter(|id| **id == node.id).count()
        };
        Ok(count as i64)
    }
}
